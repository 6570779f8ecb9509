//! Ticket header parsing.

use titlemgr_core::TitleId;

use crate::StoreError;

/// Offset of the title id within the ticket body.
const TITLE_ID_OFFSET: usize = 0x9C;

/// Size of the fixed part of the ticket body.
pub const TICKET_BODY_LEN: usize = 0x164;

/// Signature types a ticket may be signed with.
pub const SIG_RSA4096_SHA1: u32 = 0x10000;
pub const SIG_RSA2048_SHA1: u32 = 0x10001;
pub const SIG_ECDSA_SHA1: u32 = 0x10002;
pub const SIG_RSA4096_SHA256: u32 = 0x10003;
pub const SIG_RSA2048_SHA256: u32 = 0x10004;
pub const SIG_ECDSA_SHA256: u32 = 0x10005;

/// Length of the signature header (type, signature, padding) for a
/// signature type.
pub fn signature_header_len(sig_type: u32) -> Option<usize> {
    match sig_type {
        SIG_RSA4096_SHA1 | SIG_RSA4096_SHA256 => Some(4 + 0x200 + 0x3C),
        SIG_RSA2048_SHA1 | SIG_RSA2048_SHA256 => Some(4 + 0x100 + 0x3C),
        SIG_ECDSA_SHA1 | SIG_ECDSA_SHA256 => Some(4 + 0x3C + 0x40),
        _ => None,
    }
}

/// Read the title id out of the start of a ticket.
///
/// Only the signature header and the fixed body need to be present, so the
/// first block of a transfer is enough.
pub fn parse_title_id(data: &[u8]) -> Result<TitleId, StoreError> {
    let sig_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StoreError::invalid_ticket("missing signature type"))?;
    let sig_type = u32::from_be_bytes(sig_bytes);

    let header_len = signature_header_len(sig_type).ok_or_else(|| {
        StoreError::invalid_ticket(format!("unknown signature type {sig_type:#x}"))
    })?;

    if data.len() < header_len + TICKET_BODY_LEN {
        return Err(StoreError::invalid_ticket(format!(
            "need {} bytes, got {}",
            header_len + TICKET_BODY_LEN,
            data.len()
        )));
    }

    let start = header_len + TITLE_ID_OFFSET;
    let mut id = [0u8; 8];
    id.copy_from_slice(&data[start..start + 8]);
    Ok(TitleId(u64::from_be_bytes(id)))
}

/// Build a minimal ticket for `title_id` with an empty RSA-2048 signature.
///
/// The store never checks signatures; this is what tests and tooling use to
/// seed a content store.
pub fn unsigned_ticket(title_id: TitleId) -> Vec<u8> {
    let header_len = 4 + 0x100 + 0x3C;
    let mut data = vec![0u8; header_len + TICKET_BODY_LEN];
    data[..4].copy_from_slice(&SIG_RSA2048_SHA256.to_be_bytes());
    let start = header_len + TITLE_ID_OFFSET;
    data[start..start + 8].copy_from_slice(&title_id.0.to_be_bytes());
    data
}
