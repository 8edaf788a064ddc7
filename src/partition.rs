//! ColumnPartitioner: packs a projection into byte-bounded column
//! chunks, greedy first-fit over `LENG`.

use crate::capability::DictRow;
use crate::error::CsapError;

/// Default `SAP_BUFFER_SIZE`: conservative cap on packed bytes per row
/// that a single `READ_TABLE` call can return.
pub const SAP_BUFFER_SIZE: u32 = 400;

pub type ColumnChunk = Vec<String>;

/// Greedy first-fit partition of `fields` (already in projection order)
/// into chunks whose summed `LENG` is `<= max_bytes`. Field order within
/// and across chunks is preserved so row-wise stitching reproduces the
/// requested projection.
pub fn partition(fields: &[DictRow], max_bytes: u32) -> Result<Vec<ColumnChunk>, CsapError> {
    let mut chunks = Vec::new();
    let mut current: ColumnChunk = Vec::new();
    let mut current_bytes: u32 = 0;

    for field in fields {
        if field.leng > max_bytes {
            return Err(CsapError::FieldTooWide {
                field: field.fieldname.clone(),
                leng: field.leng,
                max_bytes,
            });
        }

        if !current.is_empty() && current_bytes + field.leng > max_bytes {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current.push(field.fieldname.clone());
        current_bytes += field.leng;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    Ok(chunks)
}
