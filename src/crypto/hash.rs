/// SHA-256 helpers and content addressing.
///
/// Content addresses are CIDv1 strings (raw codec, sha2-256 multihash,
/// lowercase base32 multibase), the same form an IPFS node returns for a
/// raw block with `cid-version=1`.
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha256};

const CID_V1: u8 = 0x01;
const CODEC_RAW: u8 = 0x55;
const MULTIHASH_SHA2_256: u8 = 0x12;
const DIGEST_LEN: u8 = 0x20;

/// Hash arbitrary data with SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// CIDv1 for a raw block of `data`.
pub fn cid_v1_raw(data: &[u8]) -> String {
    let mut cid = Vec::with_capacity(4 + 32);
    cid.extend_from_slice(&[CID_V1, CODEC_RAW, MULTIHASH_SHA2_256, DIGEST_LEN]);
    cid.extend_from_slice(&sha256(data));
    format!("b{}", BASE32_NOPAD.encode(&cid).to_lowercase())
}
