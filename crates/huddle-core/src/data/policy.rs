use serde::{Deserialize, Serialize};

/// How a read balances the local cache against the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Serve cached data when present; fetch only on a miss. With
    /// `background_refresh`, a hit also kicks off a non-blocking refresh.
    CacheFirst { background_refresh: bool },
    /// Always fetch, writing the result through to the cache.
    ApiOnly,
    /// Never touch the network.
    CacheOnly,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::CacheFirst {
            background_refresh: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Cache,
    Api,
}

/// A value together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DataResult<T> {
    pub data: T,
    pub source: DataSource,
}

impl<T> DataResult<T> {
    pub fn from_cache(data: T) -> Self {
        Self {
            data,
            source: DataSource::Cache,
        }
    }

    pub fn from_api(data: T) -> Self {
        Self {
            data,
            source: DataSource::Api,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataResult<U> {
        DataResult {
            data: f(self.data),
            source: self.source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_refreshes_in_background() {
        assert_eq!(
            CachePolicy::default(),
            CachePolicy::CacheFirst {
                background_refresh: true
            }
        );
    }

    #[test]
    fn test_map_keeps_source() {
        let result = DataResult::from_cache(vec![1, 2, 3]).map(|v| v.len());
        assert_eq!(result.data, 3);
        assert_eq!(result.source, DataSource::Cache);
    }
}
