//! # Core Traits (Ports)
//!
//! The persistence contract the crawler loop drives. Implementations live in
//! plugin crates.

use crate::error::Result;
use crate::models::{Item, Node};
use async_trait::async_trait;

/// Frontier and catalog persistence contract.
///
/// Every multi-step mutation is atomic on its own, but there is no cross-call
/// isolation: two workers can both receive the same node from
/// `next_node_to_crawl` before either touches it. Scheduling is therefore
/// at-least-once; a duplicate crawl is absorbed by the upsert/replace
/// semantics downstream.
#[async_trait]
pub trait CrawlRepo: Send + Sync {
    // Frontier operations

    /// Inserts a frontier row for every id not already present, timestamped
    /// far in the past so new nodes sort first. Existing rows are left
    /// untouched: re-discovering a known node never resets its place in the
    /// crawl order. The whole batch commits or none of it does.
    async fn enqueue_discovered(&self, ids: &[String]) -> Result<()>;

    /// The node with the globally smallest `last_crawled`, ties broken by id.
    /// Fails with `NotFound` on an empty frontier.
    async fn next_node_to_crawl(&self) -> Result<Node>;

    /// Stamps `last_crawled = now`, creating a minimal row when the id is
    /// unknown. Pushes a node to the back of the schedule immediately, e.g.
    /// after a failed fetch, so it is not retried in a tight loop.
    async fn touch(&self, id: &str) -> Result<()>;

    // Node operations

    /// Full upsert: stamps `last_crawled = now` and overwrites every profile
    /// field unconditionally, last write wins. Moderation flags are not part
    /// of the profile and survive the save.
    async fn save_profile(&self, node: &Node) -> Result<()>;

    /// Point lookup by id. Fails with `NotFound` when absent.
    async fn get_node(&self, id: &str) -> Result<Node>;

    // Catalog operations

    /// Replaces the owner's entire catalog with `items` in one transaction:
    /// the stored set is always exactly the set from the most recent sync.
    /// An empty `items` is legal and clears the catalog. On failure the
    /// prior catalog is left intact.
    async fn replace_catalog(&self, owner: &str, items: &[Item]) -> Result<()>;

    /// The owner's current catalog, in stable insertion order.
    async fn catalog_for_node(&self, owner: &str) -> Result<Vec<Item>>;
}
