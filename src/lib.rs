pub mod core_maintainer;
pub mod digest;
pub mod error;
pub mod extractor;
pub mod graph;
pub mod mbp_tree;
pub mod order;
pub mod shell_tree;

pub use core_maintainer::CoreMaintainer;
pub use digest::Digest;
pub use error::{Error, ProofError, Result};
pub use extractor::{SemiIndexExtractor, Strategy};
pub use graph::{Graph, VertexId};
pub use mbp_tree::{
    vo::{verify, VerifiedAnswer, VoEntry},
    MbpConfig, MbpTree,
};
pub use order::{rank_tree::RankTree, OrderList};
pub use shell_tree::ShellTree;
