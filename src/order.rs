use std::fmt::Debug;

use crate::{
    error::{Error, Result},
    graph::VertexId,
};

pub mod rank_tree;

/// A total order over a set of vertices, addressed by 1-based rank. Ranks are
/// never stored by callers across a structural change; they are recomputed.
pub trait OrderList
where
    Self: Debug + Default + Sized,
{
    /// Insert v before every element.
    fn insert_front(&mut self, v: VertexId) -> Result<()> {
        self.insert_at(1, v)
    }
    /// Insert v after every element.
    fn insert_back(&mut self, v: VertexId) -> Result<()> {
        self.insert_at(self.len() + 1, v)
    }
    /// Insert v so that it ends at `rank`. Valid ranks are `1..=len() + 1`.
    fn insert_at(&mut self, rank: usize, v: VertexId) -> Result<()>;
    /// Insert v right after `anchor`.
    fn insert_after(&mut self, anchor: VertexId, v: VertexId) -> Result<()> {
        let r = self.rank(anchor)?;
        self.insert_at(r + 1, v)
    }
    fn erase(&mut self, v: VertexId) -> Result<()>;
    /// Position of v, 1-indexed.
    fn rank(&self, v: VertexId) -> Result<usize>;
    /// Vertex at a 1-indexed position.
    fn at(&self, rank: usize) -> Result<VertexId>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn contains(&self, v: VertexId) -> bool;
    /// All vertices, in order.
    fn vertices(&self) -> Vec<VertexId>;
    /// Does u come before v?
    fn precedes(&self, u: VertexId, v: VertexId) -> Result<bool> {
        Ok(self.rank(u)? < self.rank(v)?)
    }
    fn first(&self) -> Result<VertexId> {
        self.at(1)
    }
    fn last(&self) -> Result<VertexId> {
        self.at(self.len())
    }
    /// New list holding `vs` in the given order.
    fn from_ordered(vs: &[VertexId]) -> Result<Self> {
        let mut list = Self::default();
        for &v in vs {
            list.insert_back(v)?;
        }
        Ok(list)
    }
    /// Diagnostic validation of the internal structure.
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared bounds check for `at`.
pub(crate) fn check_position(rank: usize, len: usize) -> Result<()> {
    if len == 0 {
        Err(Error::TreeEmpty)
    } else if rank == 0 || rank > len {
        Err(Error::InvalidRange {
            position: rank,
            len,
        })
    } else {
        Ok(())
    }
}
