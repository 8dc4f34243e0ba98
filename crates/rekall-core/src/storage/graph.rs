//! Knowledge Graph (C6): typed edges, traversal, deprecation. See
//! `spec.md` §4.6.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::entry::{Link, Relation};
use crate::error::{CoreError, Result};

use super::connection::Storage;

/// Traversal direction for [`Storage::neighbors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Storage {
    /// `link(a, b, relation, reason?)`. `supersedes` edges that would close
    /// a cycle are refused with `CycleDetected` (modeled as `Conflict`,
    /// per `spec.md` §7's closed error taxonomy).
    pub fn link(
        &self,
        source_id: &str,
        target_id: &str,
        relation: Relation,
        reason: Option<&str>,
    ) -> Result<()> {
        if source_id == target_id {
            return Err(CoreError::InvalidInput(
                "a link's source and target must differ".into(),
            ));
        }
        let conn = self.writer.lock().expect("writer mutex poisoned");

        for id in [source_id, target_id] {
            let exists: bool = conn
                .query_row("SELECT 1 FROM entries WHERE id = ?1", [id], |_| Ok(true))
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Err(CoreError::NotFound(id.to_string()));
            }
        }

        if relation == Relation::Supersedes
            && creates_cycle(&conn, source_id, target_id)?
        {
            return Err(CoreError::Conflict(format!(
                "link {source_id}->{target_id} (supersedes) would close a cycle"
            )));
        }

        conn.execute(
            "INSERT INTO links (source_id, target_id, relation, reason, created_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(source_id, target_id, relation) DO UPDATE SET reason = excluded.reason",
            params![source_id, target_id, relation.as_str(), reason, Utc::now()],
        )?;
        Ok(())
    }

    pub fn unlink(&self, source_id: &str, target_id: &str, relation: Relation) -> Result<()> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM links WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
            params![source_id, target_id, relation.as_str()],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound(format!(
                "link {source_id}->{target_id} ({})",
                relation.as_str()
            )));
        }
        Ok(())
    }

    /// Ids adjacent to `id`, optionally filtered by `relation`.
    pub fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        relation: Option<Relation>,
    ) -> Result<Vec<String>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            let mut stmt = conn.prepare(
                "SELECT target_id, relation FROM links WHERE source_id = ?1",
            )?;
            let rows = stmt.query_map([id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (target, rel) = row?;
                if relation.is_none_or(|rq| Relation::parse(&rel) == Some(rq)) {
                    out.push(target);
                }
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            let mut stmt = conn.prepare(
                "SELECT source_id, relation FROM links WHERE target_id = ?1",
            )?;
            let rows = stmt.query_map([id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (source, rel) = row?;
                if relation.is_none_or(|rq| Relation::parse(&rel) == Some(rq)) {
                    out.push(source);
                }
            }
        }
        Ok(out)
    }

    /// Edges adjacent to `id`, with relation, reason, and creation time
    /// (`spec.md` §4.6) — unlike [`Storage::neighbors`], which returns bare
    /// ids, this is the full edge a caller would need to display or export.
    pub fn links(&self, id: &str, direction: Direction, relation: Option<Relation>) -> Result<Vec<Link>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut out = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            let mut stmt = conn.prepare(
                "SELECT target_id, relation, reason, created_at FROM links WHERE source_id = ?1",
            )?;
            let rows = stmt.query_map([id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, chrono::DateTime<Utc>>(3)?,
                ))
            })?;
            for row in rows {
                let (target, rel, reason, created_at) = row?;
                let Some(rel) = Relation::parse(&rel) else { continue };
                if relation.is_some_and(|rq| rq != rel) {
                    continue;
                }
                out.push(Link { source_id: id.to_string(), target_id: target, relation: rel, reason, created_at });
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            let mut stmt = conn.prepare(
                "SELECT source_id, relation, reason, created_at FROM links WHERE target_id = ?1",
            )?;
            let rows = stmt.query_map([id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, chrono::DateTime<Utc>>(3)?,
                ))
            })?;
            for row in rows {
                let (source, rel, reason, created_at) = row?;
                let Some(rel) = Relation::parse(&rel) else { continue };
                if relation.is_some_and(|rq| rq != rel) {
                    continue;
                }
                out.push(Link { source_id: source, target_id: id.to_string(), relation: rel, reason, created_at });
            }
        }
        Ok(out)
    }

    /// Breadth-first traversal up to `depth` hops, both directions, any
    /// relation — backs `Core::graph(root, depth)`.
    pub fn graph(&self, root: &str, depth: usize) -> Result<Vec<(String, usize)>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(root.to_string());
        queue.push_back((root.to_string(), 0usize));
        let mut out = Vec::new();
        while let Some((id, d)) = queue.pop_front() {
            if d > 0 {
                out.push((id.clone(), d));
            }
            if d >= depth {
                continue;
            }
            for n in self.neighbors(&id, Direction::Both, None)? {
                if visited.insert(n.clone()) {
                    queue.push_back((n, d + 1));
                }
            }
        }
        Ok(out)
    }

    /// Mark `id` deprecated; if `replacement` is given, add a `supersedes`
    /// edge from replacement to `id`.
    pub fn deprecate(&self, id: &str, replacement: Option<&str>) -> Result<()> {
        {
            let conn = self.writer.lock().expect("writer mutex poisoned");
            let changed = conn.execute("UPDATE entries SET deprecated = 1 WHERE id = ?1", [id])?;
            if changed == 0 {
                return Err(CoreError::NotFound(id.to_string()));
            }
        }
        if let Some(replacement) = replacement {
            self.link(replacement, id, Relation::Supersedes, None)?;
        }
        Ok(())
    }
}

/// True if adding `source -> target` (supersedes) would close a cycle,
/// i.e. `target` can already reach `source` via existing supersedes edges.
fn creates_cycle(conn: &rusqlite::Connection, source: &str, target: &str) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut stack = vec![target.to_string()];
    while let Some(current) = stack.pop() {
        if current == source {
            return Ok(true);
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let mut stmt = conn.prepare(
            "SELECT target_id FROM links WHERE source_id = ?1 AND relation = 'supersedes'",
        )?;
        let rows = stmt.query_map([&current], |r| r.get::<_, String>(0))?;
        for row in rows {
            stack.push(row?);
        }
    }
    Ok(false)
}
