//! Typed helpers over [`Exec`]: JSON value get/set and prefix-scanned
//! listing, the shape every other module in this crate (`chains`,
//! `dispatch`, `backends`, ...) builds on instead of touching raw bytes.

use crate::error::StoreError;
use crate::exec::Exec;
use serde::{Serialize, de::DeserializeOwned};

pub async fn get_json<T: DeserializeOwned>(exec: &dyn Exec, key: &str) -> Result<Option<T>, StoreError> {
    match exec.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(exec: &dyn Exec, key: &str, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    exec.set(key, &bytes).await
}

pub async fn list_prefix_json<T: DeserializeOwned>(exec: &dyn Exec, prefix: &str) -> Result<Vec<T>, StoreError> {
    let rows = exec.list_prefix(prefix).await?;
    rows.into_iter()
        .map(|row| serde_json::from_slice(&row.value).map_err(StoreError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::SqliteExec;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Thing {
        id: String,
        n: u32,
    }

    #[tokio::test]
    async fn json_round_trips() {
        let store = SqliteExec::connect("sqlite::memory:").await.unwrap();
        let thing = Thing { id: "a".into(), n: 7 };
        set_json(&store, "thing:a", &thing).await.unwrap();
        let got: Option<Thing> = get_json(&store, "thing:a").await.unwrap();
        assert_eq!(got, Some(thing));
    }

    #[tokio::test]
    async fn prefix_listing_decodes_every_match() {
        let store = SqliteExec::connect("sqlite::memory:").await.unwrap();
        set_json(&store, "thing:a", &Thing { id: "a".into(), n: 1 }).await.unwrap();
        set_json(&store, "thing:b", &Thing { id: "b".into(), n: 2 }).await.unwrap();
        let all: Vec<Thing> = list_prefix_json(&store, "thing:").await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
