// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Etcd-backed implementation of the store facade.
//!
//! A failed connection at startup is fatal for the whole run: without the
//! store no coordination is possible, so the error propagates out of
//! runtime construction instead of being retried here.

use crate::storage::key_value_store::{KeyValueStore, LockToken};
use crate::{ErrorContext, Result};
use async_trait::async_trait;
use etcd_client::{
    Compare, CompareOp, DeleteOptions, GetOptions, Txn, TxnOp,
};

/// [`KeyValueStore`] over an etcd cluster.
pub struct EtcdStore {
    client: etcd_client::Client,
}

impl EtcdStore {
    /// Connect to the cluster at `etcd_urls`.
    pub async fn connect(etcd_urls: Vec<String>) -> Result<Self> {
        let client = etcd_client::Client::connect(etcd_urls.clone(), None)
            .await
            .with_context(|| {
                format!(
                    "Unable to connect to etcd server at {}. Check etcd server status",
                    etcd_urls.join(", ")
                )
            })?;
        Ok(Self { client })
    }

    /// Clones share the underlying channel; etcd client calls take `&mut`.
    fn client(&self) -> etcd_client::Client {
        self.client.clone()
    }
}

#[async_trait]
impl KeyValueStore for EtcdStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut client = self.client();
        client
            .put(key, value, None)
            .await
            .with_context(|| format!("etcd put failed for {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client();
        let resp = client
            .get(key, None)
            .await
            .with_context(|| format!("etcd get failed for {key}"))?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client();
        client
            .delete(key, None)
            .await
            .with_context(|| format!("etcd delete failed for {key}"))?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut client = self.client();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .with_context(|| format!("etcd prefix listing failed for {prefix}"))?;
        resp.kvs()
            .iter()
            .map(|kv| Ok((kv.key_str()?.to_string(), kv.value().to_vec())))
            .collect()
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut client = self.client();
        client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .with_context(|| format!("etcd recursive delete failed for {prefix}"))?;
        Ok(())
    }

    async fn lock(&self, name: &str) -> Result<LockToken> {
        let mut client = self.client();
        let resp = client
            .lock(name, None)
            .await
            .with_context(|| format!("etcd lock acquisition failed for {name}"))?;
        Ok(LockToken(resp.key().to_vec()))
    }

    async fn unlock(&self, token: LockToken) -> Result<()> {
        let mut client = self.client();
        client
            .unlock(token.0)
            .await
            .context("etcd unlock failed")?;
        Ok(())
    }

    /// Compare-and-swap loop over an etcd transaction. The compare is on
    /// the key's version (0 = key absent) for the create case and on the
    /// current value otherwise, so concurrent increments never lose an
    /// update; a lost race just reruns the loop.
    async fn increment(&self, key: &str) -> Result<i64> {
        let mut client = self.client();
        loop {
            let resp = client
                .get(key, None)
                .await
                .with_context(|| format!("etcd get failed for counter {key}"))?;

            let (compare, next) = match resp.kvs().first() {
                None => (Compare::version(key, CompareOp::Equal, 0), 1i64),
                Some(kv) => {
                    let current: i64 = std::str::from_utf8(kv.value())?.trim().parse()?;
                    (
                        Compare::value(key, CompareOp::Equal, kv.value().to_vec()),
                        current + 1,
                    )
                }
            };

            let txn = Txn::new()
                .when(vec![compare])
                .and_then(vec![TxnOp::put(key, next.to_string(), None)]);
            let resp = client
                .txn(txn)
                .await
                .with_context(|| format!("etcd increment txn failed for {key}"))?;
            if resp.succeeded() {
                return Ok(next);
            }
            tracing::debug!("increment raced on {key}, retrying");
        }
    }
}
