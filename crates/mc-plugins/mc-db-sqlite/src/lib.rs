//! # mc-db-sqlite Implementation
//!
//! SQLite implementation of the `mc-core` crawl frontier and item catalog.
//! This module owns the mapping between the relational layout and the domain
//! models; the comma-joined `thumbnail` and `categories` columns never leave
//! this boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mc_core::error::{Result, StoreError};
use mc_core::models::{Item, Node, Price, Profile, ProfileStats, Thumbnails};
use mc_core::traits::CrawlRepo;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Timestamp given to freshly discovered nodes so they sort ahead of
/// everything that has ever been visited.
const NEVER_CRAWLED: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

pub struct SqliteCrawlRepo {
    pool: SqlitePool,
}

impl SqliteCrawlRepo {
    /// Opens (creating if missing) the database at `url` and ensures the
    /// schema exists. Safe to call against an already-initialized store.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(map_db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(map_db_err)?;
        Self::from_pool(pool).await
    }

    /// A private throwaway database, primarily for tests. Pinned to a single
    /// connection that never expires, since every in-memory connection is its
    /// own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(map_db_err)?;
        Self::from_pool(pool).await
    }

    /// Wraps an externally constructed pool and ensures the schema exists.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let repo = Self { pool };
        repo.init_schema().await?;
        Ok(repo)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS nodes (
                id TEXT NOT NULL PRIMARY KEY,
                lastUpdated TEXT NOT NULL,
                name TEXT,
                handle TEXT,
                location TEXT,
                nsfw INTEGER,
                vendor INTEGER,
                moderator INTEGER,
                about TEXT,
                shortDescription TEXT,
                followerCount INTEGER,
                followingCount INTEGER,
                listingCount INTEGER,
                postCount INTEGER,
                ratingCount INTEGER,
                averageRating REAL,
                listed INTEGER NOT NULL DEFAULT 0,
                banned INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS items (
                owner TEXT NOT NULL,
                hash TEXT NOT NULL PRIMARY KEY,
                slug TEXT,
                title TEXT,
                tags TEXT,
                description TEXT,
                thumbnail TEXT,
                language TEXT,
                priceAmount INTEGER,
                priceCurrency TEXT,
                categories TEXT,
                nsfw INTEGER,
                contractType TEXT,
                rating REAL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;

        // The frontier scan and the per-owner catalog swap both walk these.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_lastUpdated ON nodes (lastUpdated)")
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_owner ON items (owner)")
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;

        Ok(())
    }
}

#[async_trait]
impl CrawlRepo for SqliteCrawlRepo {
    /// Insert-if-absent for the whole batch, one transaction. Existing rows
    /// keep their timestamp: re-discovering a known node must never reset
    /// its place in the crawl order.
    async fn enqueue_discovered(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;
        for id in ids {
            let res = sqlx::query("INSERT OR IGNORE INTO nodes (id, lastUpdated) VALUES (?, ?)")
                .bind(id)
                .bind(NEVER_CRAWLED)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            if res.rows_affected() > 0 {
                tracing::debug!(node = %id, "enqueued discovered node");
            }
        }
        tx.commit().await.map_err(map_db_err)
    }

    /// Oldest-first frontier pop. A plain read: no claim is taken, so two
    /// concurrent workers can both receive the same node.
    async fn next_node_to_crawl(&self) -> Result<Node> {
        let row = sqlx::query("SELECT * FROM nodes ORDER BY lastUpdated ASC, id ASC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.map(|r| node_from_row(&r))
            .ok_or_else(|| StoreError::NotFound("frontier is empty".to_string()))
    }

    async fn touch(&self, id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO nodes (id, lastUpdated) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET lastUpdated = excluded.lastUpdated",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    /// Full profile upsert: stamps `lastUpdated` and overwrites every profile
    /// column, last write wins. `listed` and `banned` stay out of the update
    /// list; a crawl pass must not undo moderation.
    async fn save_profile(&self, node: &Node) -> Result<()> {
        let profile = node.profile.as_ref();
        let stats = profile.map(|p| p.stats);
        sqlx::query(
            "INSERT INTO nodes (id, lastUpdated, name, handle, location, nsfw, vendor, \
             moderator, about, shortDescription, followerCount, followingCount, listingCount, \
             postCount, ratingCount, averageRating) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             lastUpdated = excluded.lastUpdated, name = excluded.name, \
             handle = excluded.handle, location = excluded.location, nsfw = excluded.nsfw, \
             vendor = excluded.vendor, moderator = excluded.moderator, about = excluded.about, \
             shortDescription = excluded.shortDescription, \
             followerCount = excluded.followerCount, followingCount = excluded.followingCount, \
             listingCount = excluded.listingCount, postCount = excluded.postCount, \
             ratingCount = excluded.ratingCount, averageRating = excluded.averageRating",
        )
        .bind(&node.id)
        .bind(Utc::now())
        .bind(profile.map(|p| p.name.as_str()))
        .bind(profile.map(|p| p.handle.as_str()))
        .bind(profile.map(|p| p.location.as_str()))
        .bind(profile.map(|p| p.nsfw))
        .bind(profile.map(|p| p.vendor))
        .bind(profile.map(|p| p.moderator))
        .bind(profile.map(|p| p.about.as_str()))
        .bind(profile.map(|p| p.short_description.as_str()))
        .bind(stats.map(|s| s.follower_count))
        .bind(stats.map(|s| s.following_count))
        .bind(stats.map(|s| s.listing_count))
        .bind(stats.map(|s| s.post_count))
        .bind(stats.map(|s| s.rating_count))
        .bind(stats.map(|s| s.average_rating))
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Node> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.map(|r| node_from_row(&r))
            .ok_or_else(|| StoreError::NotFound(format!("node {id}")))
    }

    /// Swaps the owner's catalog for the reported set inside one transaction.
    /// Deleting first keeps the invariant that the stored set is exactly the
    /// set from the most recent sync, never an accumulation.
    async fn replace_catalog(&self, owner: &str, items: &[Item]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        sqlx::query("DELETE FROM items WHERE owner = ?")
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        for item in items {
            // A hash can resurface under a different owner from stale data;
            // the conflict clause retargets the whole row, owner included.
            sqlx::query(
                "INSERT INTO items (owner, hash, slug, title, tags, description, thumbnail, \
                 language, priceAmount, priceCurrency, categories, nsfw, contractType, rating) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(hash) DO UPDATE SET \
                 owner = excluded.owner, slug = excluded.slug, title = excluded.title, \
                 tags = excluded.tags, description = excluded.description, \
                 thumbnail = excluded.thumbnail, language = excluded.language, \
                 priceAmount = excluded.priceAmount, priceCurrency = excluded.priceCurrency, \
                 categories = excluded.categories, nsfw = excluded.nsfw, \
                 contractType = excluded.contractType, rating = excluded.rating",
            )
            .bind(owner)
            .bind(&item.hash)
            .bind(&item.slug)
            .bind(&item.title)
            .bind("") // tags: reserved column, never populated
            .bind(&item.description)
            .bind(thumbnail_column(&item.thumbnail))
            .bind(&item.language)
            .bind(item.price.amount)
            .bind(&item.price.currency_code)
            .bind(categories_column(&item.categories))
            .bind(item.nsfw)
            .bind(&item.contract_type)
            .bind(item.average_rating)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;
        tracing::debug!(owner, count = items.len(), "catalog replaced");
        Ok(())
    }

    async fn catalog_for_node(&self, owner: &str) -> Result<Vec<Item>> {
        let rows = sqlx::query("SELECT * FROM items WHERE owner = ? ORDER BY rowid ASC")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(rows.iter().map(item_from_row).collect())
    }
}

/// Folds driver errors into the store taxonomy. Lookup misses never reach
/// this; reads go through `fetch_optional`.
fn map_db_err(err: sqlx::Error) -> StoreError {
    use sqlx::Error;
    match &err {
        Error::Io(_) | Error::PoolTimedOut | Error::PoolClosed => {
            StoreError::Connectivity(err.to_string())
        }
        _ => StoreError::Transaction(err.to_string()),
    }
}

fn node_from_row(row: &SqliteRow) -> Node {
    // Profile columns are written all-or-nothing, so `name` doubles as the
    // presence marker for the whole profile.
    let name: Option<String> = row.get("name");
    let profile = name.map(|name| Profile {
        name,
        handle: row.get::<Option<String>, _>("handle").unwrap_or_default(),
        location: row.get::<Option<String>, _>("location").unwrap_or_default(),
        nsfw: row.get::<Option<bool>, _>("nsfw").unwrap_or_default(),
        vendor: row.get::<Option<bool>, _>("vendor").unwrap_or_default(),
        moderator: row.get::<Option<bool>, _>("moderator").unwrap_or_default(),
        about: row.get::<Option<String>, _>("about").unwrap_or_default(),
        short_description: row
            .get::<Option<String>, _>("shortDescription")
            .unwrap_or_default(),
        stats: ProfileStats {
            follower_count: row.get::<Option<u32>, _>("followerCount").unwrap_or_default(),
            following_count: row.get::<Option<u32>, _>("followingCount").unwrap_or_default(),
            listing_count: row.get::<Option<u32>, _>("listingCount").unwrap_or_default(),
            post_count: row.get::<Option<u32>, _>("postCount").unwrap_or_default(),
            rating_count: row.get::<Option<u32>, _>("ratingCount").unwrap_or_default(),
            average_rating: row.get::<Option<f64>, _>("averageRating").unwrap_or_default(),
        },
    });
    Node {
        id: row.get("id"),
        last_crawled: row.get("lastUpdated"),
        listed: row.get("listed"),
        banned: row.get("banned"),
        profile,
    }
}

fn item_from_row(row: &SqliteRow) -> Item {
    Item {
        hash: row.get("hash"),
        slug: row.get::<Option<String>, _>("slug").unwrap_or_default(),
        title: row.get::<Option<String>, _>("title").unwrap_or_default(),
        description: row.get::<Option<String>, _>("description").unwrap_or_default(),
        thumbnail: thumbnails_from_column(
            &row.get::<Option<String>, _>("thumbnail").unwrap_or_default(),
        ),
        language: row.get::<Option<String>, _>("language").unwrap_or_default(),
        price: Price {
            amount: row.get::<Option<i64>, _>("priceAmount").unwrap_or_default(),
            currency_code: row.get::<Option<String>, _>("priceCurrency").unwrap_or_default(),
        },
        categories: categories_from_column(
            &row.get::<Option<String>, _>("categories").unwrap_or_default(),
        ),
        nsfw: row.get::<Option<bool>, _>("nsfw").unwrap_or_default(),
        contract_type: row.get::<Option<String>, _>("contractType").unwrap_or_default(),
        average_rating: row.get::<Option<f64>, _>("rating").unwrap_or_default(),
    }
}

// Both composite fields are stored comma-joined, in fixed order. The joined
// form stays behind this boundary.

fn thumbnail_column(t: &Thumbnails) -> String {
    format!("{},{},{}", t.tiny, t.small, t.medium)
}

fn thumbnails_from_column(raw: &str) -> Thumbnails {
    let mut parts = raw.splitn(3, ',');
    Thumbnails {
        tiny: parts.next().unwrap_or_default().to_string(),
        small: parts.next().unwrap_or_default().to_string(),
        medium: parts.next().unwrap_or_default().to_string(),
    }
}

fn categories_column(categories: &[String]) -> String {
    categories.join(",")
}

fn categories_from_column(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_repo() -> SqliteCrawlRepo {
        SqliteCrawlRepo::in_memory().await.expect("in-memory store")
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn profile(name: &str, followers: u32) -> Profile {
        Profile {
            name: name.to_string(),
            handle: format!("@{name}"),
            location: "Internet".to_string(),
            nsfw: false,
            vendor: true,
            moderator: false,
            about: "Sells handmade widgets".to_string(),
            short_description: "Widget shop".to_string(),
            stats: ProfileStats {
                follower_count: followers,
                following_count: 3,
                listing_count: 1,
                post_count: 7,
                rating_count: 2,
                average_rating: 4.5,
            },
        }
    }

    fn node(id: &str, profile: Option<Profile>) -> Node {
        Node {
            id: id.to_string(),
            last_crawled: Utc::now(),
            listed: false,
            banned: false,
            profile,
        }
    }

    fn listing(hash: &str) -> Item {
        Item {
            hash: hash.to_string(),
            slug: format!("{hash}-widget"),
            title: "Widget".to_string(),
            description: "A fine widget".to_string(),
            thumbnail: Thumbnails {
                tiny: "t.png".to_string(),
                small: "s.png".to_string(),
                medium: "m.png".to_string(),
            },
            language: "en".to_string(),
            price: Price {
                amount: 1250,
                currency_code: "USD".to_string(),
            },
            categories: vec!["tools".to_string()],
            nsfw: false,
            contract_type: "PHYSICAL_GOOD".to_string(),
            average_rating: 4.0,
        }
    }

    #[tokio::test]
    async fn empty_frontier_reports_not_found() {
        let repo = memory_repo().await;
        let err = repo.next_node_to_crawl().await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn enqueued_nodes_crawl_in_insertion_order() {
        let repo = memory_repo().await;
        repo.enqueue_discovered(&ids(&["A", "B"])).await.unwrap();
        assert_eq!(repo.next_node_to_crawl().await.unwrap().id, "A");
        repo.touch("A").await.unwrap();
        assert_eq!(repo.next_node_to_crawl().await.unwrap().id, "B");
    }

    #[tokio::test]
    async fn touched_nodes_rotate_to_the_back() {
        let repo = memory_repo().await;
        repo.enqueue_discovered(&ids(&["A", "B", "C"])).await.unwrap();
        for expected in ["A", "B", "C", "A"] {
            let next = repo.next_node_to_crawl().await.unwrap();
            assert_eq!(next.id, expected);
            repo.touch(&next.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn rediscovery_keeps_crawl_timestamp() {
        let repo = memory_repo().await;
        repo.enqueue_discovered(&ids(&["A"])).await.unwrap();
        repo.touch("A").await.unwrap();
        let crawled = repo.get_node("A").await.unwrap().last_crawled;

        repo.enqueue_discovered(&ids(&["A", "B"])).await.unwrap();
        assert_eq!(repo.get_node("A").await.unwrap().last_crawled, crawled);
        // the genuinely new id still lands at the front
        assert_eq!(repo.next_node_to_crawl().await.unwrap().id, "B");
    }

    #[tokio::test]
    async fn enqueued_nodes_sort_before_touched_ones() {
        let repo = memory_repo().await;
        repo.touch("seen").await.unwrap();
        repo.enqueue_discovered(&ids(&["fresh"])).await.unwrap();
        assert_eq!(repo.next_node_to_crawl().await.unwrap().id, "fresh");
    }

    #[tokio::test]
    async fn touch_creates_a_minimal_row() {
        let repo = memory_repo().await;
        repo.touch("ghost").await.unwrap();
        let node = repo.get_node("ghost").await.unwrap();
        assert!(node.profile.is_none());
        assert!(!node.listed);
        assert!(!node.banned);
    }

    #[tokio::test]
    async fn save_profile_reads_back() {
        let repo = memory_repo().await;
        repo.save_profile(&node("A", Some(profile("X", 5)))).await.unwrap();

        let got = repo.get_node("A").await.unwrap();
        assert!(got.last_crawled > NEVER_CRAWLED);
        let p = got.profile.expect("profile saved");
        assert_eq!(p.name, "X");
        assert_eq!(p.stats.follower_count, 5);
        assert_eq!(p.stats.average_rating, 4.5);
    }

    #[tokio::test]
    async fn save_profile_is_last_write_wins() {
        let repo = memory_repo().await;
        repo.save_profile(&node("A", Some(profile("first", 5)))).await.unwrap();
        repo.save_profile(&node("A", Some(profile("second", 9)))).await.unwrap();

        let p = repo.get_node("A").await.unwrap().profile.unwrap();
        assert_eq!(p.name, "second");
        assert_eq!(p.handle, "@second");
        assert_eq!(p.stats.follower_count, 9);
    }

    #[tokio::test]
    async fn save_profile_leaves_moderation_flags_alone() {
        let repo = memory_repo().await;
        repo.save_profile(&node("A", Some(profile("X", 1)))).await.unwrap();
        sqlx::query("UPDATE nodes SET banned = 1, listed = 1 WHERE id = ?")
            .bind("A")
            .execute(&repo.pool)
            .await
            .unwrap();

        repo.save_profile(&node("A", Some(profile("X", 2)))).await.unwrap();
        let got = repo.get_node("A").await.unwrap();
        assert!(got.banned);
        assert!(got.listed);
        assert_eq!(got.profile.unwrap().stats.follower_count, 2);
    }

    #[tokio::test]
    async fn unknown_node_reports_not_found() {
        let repo = memory_repo().await;
        let err = repo.get_node("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn replace_catalog_never_accumulates() {
        let repo = memory_repo().await;
        repo.replace_catalog("A", &[listing("h1"), listing("h2")]).await.unwrap();
        repo.replace_catalog("A", &[listing("h2"), listing("h3")]).await.unwrap();

        let hashes: Vec<String> = repo
            .catalog_for_node("A")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.hash)
            .collect();
        assert_eq!(hashes, vec!["h2", "h3"]);
    }

    #[tokio::test]
    async fn replace_catalog_with_empty_set_clears() {
        let repo = memory_repo().await;
        repo.replace_catalog("A", &[listing("h1")]).await.unwrap();
        repo.replace_catalog("A", &[]).await.unwrap();
        assert!(repo.catalog_for_node("A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_hash_is_retargeted_to_its_new_owner() {
        let repo = memory_repo().await;
        repo.replace_catalog("A", &[listing("h1")]).await.unwrap();
        repo.replace_catalog("B", &[listing("h1")]).await.unwrap();

        assert!(repo.catalog_for_node("A").await.unwrap().is_empty());
        let b = repo.catalog_for_node("B").await.unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].hash, "h1");
    }

    #[tokio::test]
    async fn composite_fields_round_trip_structurally() {
        let repo = memory_repo().await;
        let mut entry = listing("h1");
        entry.categories = vec!["a".to_string(), "b".to_string()];
        entry.thumbnail = Thumbnails {
            tiny: String::new(),
            small: "s.png".to_string(),
            medium: "m.png".to_string(),
        };
        repo.replace_catalog("A", &[entry]).await.unwrap();

        let got = &repo.catalog_for_node("A").await.unwrap()[0];
        assert_eq!(got.categories, vec!["a", "b"]);
        assert_eq!(got.thumbnail.tiny, "");
        assert_eq!(got.thumbnail.small, "s.png");
        assert_eq!(got.thumbnail.medium, "m.png");

        // on-disk layout: comma-joined composites, reserved tags column empty
        let row = sqlx::query("SELECT thumbnail, tags, categories FROM items WHERE hash = ?")
            .bind("h1")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("thumbnail"), ",s.png,m.png");
        assert_eq!(row.get::<String, _>("tags"), "");
        assert_eq!(row.get::<String, _>("categories"), "a,b");
    }

    #[tokio::test]
    async fn catalog_with_no_categories_reads_back_empty() {
        let repo = memory_repo().await;
        let mut entry = listing("h1");
        entry.categories = Vec::new();
        repo.replace_catalog("A", &[entry]).await.unwrap();
        assert!(repo.catalog_for_node("A").await.unwrap()[0].categories.is_empty());
    }

    #[tokio::test]
    async fn reopening_a_store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/frontier.db", dir.path().display());
        {
            let repo = SqliteCrawlRepo::connect(&url).await.unwrap();
            repo.enqueue_discovered(&ids(&["A"])).await.unwrap();
            repo.pool.close().await;
        }
        let repo = SqliteCrawlRepo::connect(&url).await.unwrap();
        assert_eq!(repo.get_node("A").await.unwrap().id, "A");
    }
}
