//! # Domain Models
//!
//! Core entities of the marketcrawl datastore: the remote peers under crawl
//! and the catalog entries (listings) they publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote peer under crawl.
///
/// A row exists for every id ever discovered, even before anything was
/// fetched from it; `last_crawled` is always present once the row exists and
/// drives the frontier order (oldest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Opaque unique identifier handed out by the network layer
    pub id: String,
    /// Timestamp of the last successful or attempted visit
    pub last_crawled: DateTime<Utc>,
    /// Eligible to appear in search results
    pub listed: bool,
    /// Excluded by moderation; never written by a crawl pass
    pub banned: bool,
    /// Absent until the first full profile save
    pub profile: Option<Profile>,
}

/// Profile data fetched from a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub handle: String,
    pub location: String,
    pub nsfw: bool,
    pub vendor: bool,
    pub moderator: bool,
    pub about: String,
    pub short_description: String,
    pub stats: ProfileStats,
}

/// Aggregate counters a node reports about itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProfileStats {
    pub follower_count: u32,
    pub following_count: u32,
    pub listing_count: u32,
    pub post_count: u32,
    pub rating_count: u32,
    pub average_rating: f64,
}

/// A catalog entry (listing) published by exactly one node.
///
/// The owning node is not part of the item itself; ownership is established
/// by the catalog sync that stores it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    /// Globally unique content identifier
    pub hash: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub thumbnail: Thumbnails,
    pub language: String,
    pub price: Price,
    /// Ordered; the order survives a store/read round trip
    pub categories: Vec<String>,
    pub nsfw: bool,
    pub contract_type: String,
    pub average_rating: f64,
}

/// Size-variant thumbnail URLs, smallest first. Any variant may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnails {
    pub tiny: String,
    pub small: String,
    pub medium: String,
}

/// Listing price in minor currency units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: i64,
    pub currency_code: String,
}
