//! Token holding records.
//!
//! A holding is a dup-sorted entry `holder -> token ‖ firstEthTx`
//! recording the earliest transaction at which `holder` acquired `token`.
//! Later acquisitions never overwrite the record; the unwinder relies on
//! that to detect corruption.

use crate::{chunk::ADDR_LENGTH, IndexError, IndexResult};
use alloy_primitives::Address;
use explorer_kv::{Cursor as _, DupCursor as _, KvRwTx, KvTx, RwDupCursor as _, Table};

const HOLDING_LEN: usize = ADDR_LENGTH + 8;

/// One decoded holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holding {
    /// The held token contract.
    pub token: Address,
    /// Transaction id of the first acquisition.
    pub first_eth_tx: u64,
}

fn encode(token: Address, eth_tx: u64) -> [u8; HOLDING_LEN] {
    let mut v = [0u8; HOLDING_LEN];
    v[..ADDR_LENGTH].copy_from_slice(token.as_slice());
    v[ADDR_LENGTH..].copy_from_slice(&eth_tx.to_be_bytes());
    v
}

/// Records `holder` acquiring `token` at `eth_tx` unless an earlier
/// acquisition is already recorded. Returns whether a record was written.
pub fn record_holding(
    tx: &dyn KvRwTx,
    table: Table,
    holder: Address,
    token: Address,
    eth_tx: u64,
) -> IndexResult<bool> {
    let mut cur = tx.cursor_dup_rw(table)?;
    if let Some(v) = cur.seek_both_range(holder.as_slice(), token.as_slice())? {
        if v.starts_with(token.as_slice()) {
            return Ok(false);
        }
    }
    tx.put(table, holder.as_slice(), &encode(token, eth_tx))?;
    Ok(true)
}

/// Every holding of `holder`, in token order.
pub fn list_holdings(tx: &dyn KvTx, table: Table, holder: Address) -> IndexResult<Vec<Holding>> {
    let mut cur = tx.cursor_dup(table)?;
    let mut out = Vec::new();
    let mut pair = cur.seek_exact(holder.as_slice())?;
    while let Some((_, v)) = pair {
        if v.len() != HOLDING_LEN {
            return Err(IndexError::corruption(
                table,
                holder.as_slice(),
                format!("holding record of unexpected length {}", v.len()),
            ));
        }
        out.push(Holding {
            token: Address::from_slice(&v[..ADDR_LENGTH]),
            first_eth_tx: u64::from_be_bytes(v[ADDR_LENGTH..].try_into().expect("8 bytes")),
        });
        pair = cur.next_dup()?;
    }
    Ok(out)
}

/// Deletes the `(holder, token)` holding iff it was first acquired at
/// `eth_tx`.
///
/// Touches later than the recorded acquisition are no-ops (they post-date
/// the first acquisition); touches earlier than it signal corruption and
/// fail loudly.
pub fn unwind_holding(
    tx: &dyn KvRwTx,
    table: Table,
    holder: Address,
    token: Address,
    eth_tx: u64,
) -> IndexResult<()> {
    let mut cur = tx.cursor_dup_rw(table)?;
    let Some(v) = cur.seek_both_range(holder.as_slice(), token.as_slice())? else {
        return Ok(());
    };
    if !v.starts_with(token.as_slice()) {
        return Ok(());
    }
    let existing = u64::from_be_bytes(v[ADDR_LENGTH..].try_into().map_err(|_| {
        IndexError::corruption(table, holder.as_slice(), "holding record too short")
    })?);

    // Ignore touches after the first recognized acquisition.
    if eth_tx > existing {
        return Ok(());
    }
    if eth_tx < existing {
        return Err(IndexError::corruption(
            table,
            holder.as_slice(),
            format!(
                "unwinding holder={holder} token={token} ethTx={eth_tx} before recorded firstEthTx={existing}"
            ),
        ));
    }

    cur.delete_exact(holder.as_slice(), &v)?;
    Ok(())
}
