use verifiable_kcore::{Error, OrderList, Result, VertexId};

/// Dummy implementation, every operation takes linear time.
#[derive(Debug, Default, Clone)]
pub struct SlowOrder(Vec<VertexId>);

impl SlowOrder {
    fn position(&self, v: VertexId) -> Result<usize> {
        self.0
            .iter()
            .position(|&u| u == v)
            .ok_or(Error::VertexNotFound(v))
    }
}

impl OrderList for SlowOrder {
    fn insert_at(&mut self, rank: usize, v: VertexId) -> Result<()> {
        if rank == 0 || rank > self.0.len() + 1 {
            return Err(Error::InvalidRange {
                position: rank,
                len: self.0.len(),
            });
        }
        if self.0.contains(&v) {
            return Err(Error::Duplicate(v));
        }
        self.0.insert(rank - 1, v);
        Ok(())
    }

    fn erase(&mut self, v: VertexId) -> Result<()> {
        let i = self.position(v)?;
        self.0.remove(i);
        Ok(())
    }

    fn rank(&self, v: VertexId) -> Result<usize> {
        Ok(self.position(v)? + 1)
    }

    fn at(&self, rank: usize) -> Result<VertexId> {
        if self.0.is_empty() {
            return Err(Error::TreeEmpty);
        }
        rank.checked_sub(1)
            .and_then(|i| self.0.get(i).copied())
            .ok_or(Error::InvalidRange {
                position: rank,
                len: self.0.len(),
            })
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn contains(&self, v: VertexId) -> bool {
        self.0.contains(&v)
    }

    fn vertices(&self) -> Vec<VertexId> {
        self.0.clone()
    }
}
