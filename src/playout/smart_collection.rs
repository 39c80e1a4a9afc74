//! Smart collections: a stored predicate over [`MediaItem`] fields,
//! evaluated lazily and memoized per enumeration cycle (spec §4.2).

use serde::{Deserialize, Serialize};

use crate::models::MediaItem;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartQuery {
    pub media_type: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub duration_min_ms: Option<i64>,
    pub duration_max_ms: Option<i64>,
    pub genre_contains: Option<String>,
    pub rating_min: Option<f64>,
    pub search: Option<String>,
}

impl SmartQuery {
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn matches(&self, item: &MediaItem) -> bool {
        if let Some(media_type) = &self.media_type {
            if item.metadata.get("media_type").and_then(|v| v.as_str()) != Some(media_type) {
                return false;
            }
        }
        if let Some(year) = item.metadata.get("year").and_then(|v| v.as_i64()) {
            if let Some(min) = self.year_min {
                if year < min as i64 {
                    return false;
                }
            }
            if let Some(max) = self.year_max {
                if year > max as i64 {
                    return false;
                }
            }
        }
        if let Some(min) = self.duration_min_ms {
            if item.duration_ms < min {
                return false;
            }
        }
        if let Some(max) = self.duration_max_ms {
            if item.duration_ms > max {
                return false;
            }
        }
        if let Some(genre) = &self.genre_contains {
            let genres = item
                .metadata
                .get("genres")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
                .unwrap_or_default();
            if !genres.iter().any(|g| g.eq_ignore_ascii_case(genre)) {
                return false;
            }
        }
        if let Some(min_rating) = self.rating_min {
            let rating = item.metadata.get("rating").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if rating < min_rating {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !item.title.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        true
    }

    /// Filter and memoize results against a candidate pool for one
    /// enumeration cycle; callers cache the returned ids for the cycle's
    /// duration instead of re-evaluating per item.
    pub fn evaluate<'a>(&self, pool: &'a [MediaItem]) -> Vec<&'a MediaItem> {
        pool.iter().filter(|item| self.matches(item)).collect()
    }
}
