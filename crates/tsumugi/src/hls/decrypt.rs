use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, KeyIvInit,
};
use bytes::Bytes;

use crate::{
    error::{TsumugiError, TsumugiResult},
    hls::key::Aes128Key,
    segment::Segment,
};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const BLOCK_SIZE: usize = 16;

/// Decrypt one AES-128 segment.
///
/// Segments without an AES-128 key are returned as-is. Invalid PKCS#7 padding is not an
/// error: the decrypted bytes are returned with the padding left in place.
pub fn decrypt(data: Bytes, segment: &Segment, key: &Aes128Key) -> TsumugiResult<Bytes> {
    match &segment.key {
        Some(segment_key) if segment_key.is_aes128() => {}
        _ => return Ok(data),
    }

    if data.len() % BLOCK_SIZE != 0 {
        return Err(TsumugiError::Decrypt(format!(
            "segment {} has {} bytes, not a multiple of the block size",
            segment.index,
            data.len()
        )));
    }

    let iv = derive_iv(segment)?;
    match Aes128CbcDec::new(key.into(), (&iv).into()).decrypt_padded_vec_mut::<Pkcs7>(&data) {
        Ok(plain) => Ok(plain.into()),
        Err(_) => {
            tracing::debug!(
                "Segment {} is not PKCS#7 padded, keeping the last block as-is.",
                segment.index
            );
            Aes128CbcDec::new(key.into(), (&iv).into())
                .decrypt_padded_vec_mut::<NoPadding>(&data)
                .map(Bytes::from)
                .map_err(|_| TsumugiError::Decrypt(format!("segment {}", segment.index)))
        }
    }
}

/// IV of a segment: the explicit `IV` attribute if present, otherwise the segment index.
pub fn derive_iv(segment: &Segment) -> TsumugiResult<[u8; 16]> {
    match segment.key.as_ref().and_then(|key| key.iv.as_deref()) {
        Some(iv) => parse_iv(iv),
        None => Ok(default_iv(segment.index)),
    }
}

/// 128-bit big-endian integer of the sequence number.
pub fn default_iv(sequence: u64) -> [u8; 16] {
    (sequence as u128).to_be_bytes()
}

/// Parse a hex IV with an optional `0x`/`0X` prefix. Short values are left-padded with zeros.
pub fn parse_iv(iv: &str) -> TsumugiResult<[u8; 16]> {
    let digits = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    if digits.len() > 2 * BLOCK_SIZE {
        return Err(TsumugiError::InvalidIv(iv.to_string()));
    }

    let mut bytes = [0u8; 16];
    hex::decode_to_slice(format!("{digits:0>32}"), &mut bytes)
        .map_err(|_| TsumugiError::InvalidIv(iv.to_string()))?;
    Ok(bytes)
}
