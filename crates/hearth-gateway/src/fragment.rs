//! Fragmenting decorator.
//!
//! When a URL carries `fragSize=N`, payloads are split into fragments whose
//! encoded size never exceeds `N` bytes. Each fragment is stored at the
//! item URL plus `ofs=<offset>`:
//!
//! ```text
//! Fragment { fid: [u8; 4], ofs: u64, len: u64, data: Vec<u8> }
//! ```
//!
//! `fid` is random per write and ties the fragments of one payload together;
//! `len` is the total payload length. Without a usable `fragSize` the
//! decorator is a pass-through.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use hearth_types::{param, StoreUrl};

use crate::error::{GatewayError, GatewayResult};
use crate::traits::{Gateway, Subscription};

const FID_LENGTH: usize = 4;

/// Encoded size of an empty fragment under bincode's default options.
const FALLBACK_HEADER_SIZE: u64 = 28;

/// Largest payload a fragmented item may hold.
pub const MAX_FRAGMENTED_LEN: u64 = 1 << 30;

#[derive(Debug, Serialize, Deserialize)]
struct Fragment {
    fid: [u8; FID_LENGTH],
    ofs: u64,
    len: u64,
    data: Vec<u8>,
}

impl Fragment {
    fn decode(raw: &[u8]) -> GatewayResult<Self> {
        bincode::deserialize(raw).map_err(|e| GatewayError::Serialization(e.to_string()))
    }

    fn encode(&self) -> GatewayResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| GatewayError::Serialization(e.to_string()))
    }
}

/// Returns the `fragSize` parameter, or `None` when absent, zero or invalid.
fn frag_size(url: &StoreUrl) -> Option<u64> {
    url.param(param::FRAG_SIZE)
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|n| *n > 0)
}

fn fragment_url(url: &StoreUrl, ofs: u64) -> StoreUrl {
    url.with_param(param::OFFSET, ofs.to_string())
}

/// Gateway decorator that splits large payloads into bounded fragments.
pub struct FragmentGateway {
    inner: Arc<dyn Gateway>,
    header_size: u64,
}

impl FragmentGateway {
    pub fn new(inner: Arc<dyn Gateway>) -> Self {
        let empty = Fragment {
            fid: [0; FID_LENGTH],
            ofs: 0,
            len: 0,
            data: Vec::new(),
        };
        let header_size = bincode::serialized_size(&empty).unwrap_or(FALLBACK_HEADER_SIZE);
        Self { inner, header_size }
    }

    /// Bytes of framing added to each fragment.
    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    fn block_size(&self, frag_size: u64) -> GatewayResult<u64> {
        if frag_size <= self.header_size {
            return Err(GatewayError::Fragment(format!(
                "fragSize {frag_size} does not exceed header size {}",
                self.header_size
            )));
        }
        Ok(frag_size - self.header_size)
    }

    async fn fetch(&self, url: &StoreUrl, ofs: u64) -> GatewayResult<Fragment> {
        let raw = self.inner.get(&fragment_url(url, ofs)).await?;
        Fragment::decode(&raw)
    }

    /// Offsets of every fragment after the first.
    fn tail_offsets(first: &Fragment) -> GatewayResult<Vec<u64>> {
        if first.len > MAX_FRAGMENTED_LEN {
            return Err(GatewayError::Fragment(format!(
                "payload length {} exceeds {MAX_FRAGMENTED_LEN}",
                first.len
            )));
        }
        let block = first.data.len() as u64;
        if block == 0 {
            if first.len == 0 {
                return Ok(Vec::new());
            }
            return Err(GatewayError::Fragment(format!(
                "empty first fragment for {} byte payload",
                first.len
            )));
        }
        Ok((1..).map(|i| i * block).take_while(|ofs| *ofs < first.len).collect())
    }
}

#[async_trait]
impl Gateway for FragmentGateway {
    async fn start(&self, url: &StoreUrl) -> GatewayResult<StoreUrl> {
        self.inner.start(url).await
    }

    async fn build_url(&self, url: &StoreUrl, key: &str) -> GatewayResult<StoreUrl> {
        self.inner.build_url(url, key).await
    }

    async fn put(&self, url: &StoreUrl, body: Bytes) -> GatewayResult<()> {
        let Some(frag_size) = frag_size(url) else {
            return self.inner.put(url, body).await;
        };
        let block = self.block_size(frag_size)?;
        let mut fid = [0u8; FID_LENGTH];
        rand::thread_rng().fill_bytes(&mut fid);

        let len = body.len() as u64;
        let mut ofs = 0u64;
        let mut count = 0usize;
        loop {
            let end = (ofs + block).min(len);
            let fragment = Fragment {
                fid,
                ofs,
                len,
                data: body[ofs as usize..end as usize].to_vec(),
            };
            let encoded = fragment.encode()?;
            if encoded.len() as u64 > frag_size {
                return Err(GatewayError::Fragment(format!(
                    "encoded fragment of {} bytes exceeds fragSize {frag_size}",
                    encoded.len()
                )));
            }
            trace!(url = %url, ofs, size = encoded.len(), "writing fragment");
            self.inner
                .put(&fragment_url(url, ofs), Bytes::from(encoded))
                .await?;
            count += 1;
            ofs = end;
            if ofs >= len {
                break;
            }
        }
        debug!(url = %url, len, fragments = count, "fragmented put");
        Ok(())
    }

    async fn get(&self, url: &StoreUrl) -> GatewayResult<Bytes> {
        if frag_size(url).is_none() {
            return self.inner.get(url).await;
        }
        let first = self.fetch(url, 0).await?;
        let tail = Self::tail_offsets(&first)?;
        let mut written = first.data.len();
        if written as u64 > first.len {
            return Err(GatewayError::Fragment("fragment overruns payload".into()));
        }
        let mut buffer = vec![0u8; first.len as usize];
        buffer[..written].copy_from_slice(&first.data);

        for ofs in tail {
            let fragment = self.fetch(url, ofs).await?;
            if fragment.fid != first.fid {
                return Err(GatewayError::Fragment(format!("fid mismatch at ofs {ofs}")));
            }
            if fragment.ofs != ofs {
                return Err(GatewayError::Fragment(format!(
                    "ofs mismatch: expected {ofs}, found {}",
                    fragment.ofs
                )));
            }
            let start = ofs as usize;
            let end = start + fragment.data.len();
            if end > buffer.len() {
                return Err(GatewayError::Fragment("fragment overruns payload".into()));
            }
            buffer[start..end].copy_from_slice(&fragment.data);
            written += fragment.data.len();
        }
        if written != buffer.len() {
            return Err(GatewayError::Fragment(format!(
                "reassembled {written} of {} bytes",
                buffer.len()
            )));
        }
        Ok(Bytes::from(buffer))
    }

    async fn delete(&self, url: &StoreUrl) -> GatewayResult<()> {
        if frag_size(url).is_none() {
            return self.inner.delete(url).await;
        }
        let first = match self.fetch(url, 0).await {
            Ok(first) => first,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        self.inner.delete(&fragment_url(url, 0)).await?;
        for ofs in Self::tail_offsets(&first)? {
            self.inner.delete(&fragment_url(url, ofs)).await?;
        }
        Ok(())
    }

    async fn close(&self, url: &StoreUrl) -> GatewayResult<()> {
        self.inner.close(url).await
    }

    async fn destroy(&self, url: &StoreUrl) -> GatewayResult<()> {
        self.inner.destroy(url).await
    }

    fn can_subscribe(&self) -> bool {
        self.inner.can_subscribe()
    }

    async fn subscribe(&self, url: &StoreUrl) -> GatewayResult<Subscription> {
        self.inner.subscribe(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryGateway;

    fn setup() -> (Arc<MemoryGateway>, FragmentGateway) {
        let mem = Arc::new(MemoryGateway::new());
        let gw = FragmentGateway::new(mem.clone());
        (mem, gw)
    }

    fn item(frag: Option<u64>) -> StoreUrl {
        let url = StoreUrl::parse("memory://local?name=db&store=data&key=blk").unwrap();
        match frag {
            Some(n) => url.with_param(param::FRAG_SIZE, n.to_string()),
            None => url,
        }
    }

    fn payload(n: usize) -> Bytes {
        Bytes::from((0..n).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    // -----------------------------------------------------------------------
    // Pass-through
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn no_frag_size_is_pass_through() {
        let (mem, gw) = setup();
        gw.put(&item(None), payload(100)).await.unwrap();
        assert_eq!(mem.len(), 1);
        assert_eq!(gw.get(&item(None)).await.unwrap(), payload(100));
    }

    #[tokio::test]
    async fn zero_and_garbage_frag_size_are_pass_through() {
        let (mem, gw) = setup();
        let zero = item(None).with_param(param::FRAG_SIZE, "0");
        let junk = item(None).with_param(param::FRAG_SIZE, "lots");
        gw.put(&zero, payload(10)).await.unwrap();
        gw.put(&junk, payload(10)).await.unwrap();
        assert_eq!(mem.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Fragmentation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn splits_and_reassembles() {
        let (mem, gw) = setup();
        let frag = gw.header_size() + 16;
        let url = item(Some(frag));
        gw.put(&url, payload(100)).await.unwrap();
        // ceil(100 / 16)
        assert_eq!(mem.len(), 7);
        assert_eq!(gw.get(&url).await.unwrap(), payload(100));
    }

    #[tokio::test]
    async fn fragments_never_exceed_frag_size() {
        let (mem, gw) = setup();
        let frag = gw.header_size() + 10;
        gw.put(&item(Some(frag)), payload(95)).await.unwrap();
        for key in mem.keys() {
            let ofs = key.rsplit('@').next().unwrap().to_string();
            let url = item(Some(frag)).with_param(param::OFFSET, ofs);
            assert!(mem.get(&url).await.unwrap().len() as u64 <= frag);
        }
    }

    #[tokio::test]
    async fn empty_body_writes_one_fragment() {
        let (mem, gw) = setup();
        let url = item(Some(64));
        gw.put(&url, Bytes::new()).await.unwrap();
        assert_eq!(mem.len(), 1);
        assert!(gw.get(&url).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn frag_size_too_small_is_rejected() {
        let (_, gw) = setup();
        let url = item(Some(gw.header_size()));
        let err = gw.put(&url, payload(10)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fragment(_)));
    }

    #[tokio::test]
    async fn mixed_fids_are_rejected() {
        let (_, gw) = setup();
        let frag = gw.header_size() + 8;
        let url = item(Some(frag));
        gw.put(&url, payload(16)).await.unwrap();
        // Overwrite only the first fragment with a different write.
        let other = Fragment {
            fid: [9; FID_LENGTH],
            ofs: 0,
            len: 16,
            data: payload(8).to_vec(),
        };
        gw.inner
            .put(&fragment_url(&url, 0), Bytes::from(other.encode().unwrap()))
            .await
            .unwrap();
        let err = gw.get(&url).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fragment(_)));
    }

    #[tokio::test]
    async fn oversized_length_header_is_rejected() {
        let (_, gw) = setup();
        let url = item(Some(64));
        let forged = Fragment {
            fid: [1; FID_LENGTH],
            ofs: 0,
            len: u64::MAX,
            data: payload(8).to_vec(),
        };
        gw.inner
            .put(&fragment_url(&url, 0), Bytes::from(forged.encode().unwrap()))
            .await
            .unwrap();
        let err = gw.get(&url).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fragment(_)));
        assert!(matches!(gw.delete(&url).await, Err(GatewayError::Fragment(_))));
    }

    #[tokio::test]
    async fn missing_fragment_is_not_found() {
        let (_, gw) = setup();
        let err = gw.get(&item(Some(64))).await.unwrap_err();
        assert!(err.is_not_found());
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn delete_removes_all_fragments() {
        let (mem, gw) = setup();
        let frag = gw.header_size() + 16;
        let url = item(Some(frag));
        gw.put(&url, payload(64)).await.unwrap();
        assert_eq!(mem.len(), 4);
        gw.delete(&url).await.unwrap();
        assert!(mem.is_empty());
        gw.delete(&url).await.unwrap();
    }
}
