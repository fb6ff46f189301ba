//! Client-side table bloat estimation.
//!
//! The server hands back per-attribute alignment/width pairs and a set of
//! page-level factors; the padding model and the final ratio are computed
//! here. A table with `is_na` set (unanalyzed or name-typed columns) gets a
//! null ratio.

/// Byte alignment for a `pg_attribute.attalign` code. Unknown codes fall
/// back to 4-byte alignment.
pub fn attalign_bytes(code: &str) -> i64 {
    match code {
        "c" => 1,
        "s" => 2,
        "i" => 4,
        "d" => 8,
        _ => 4,
    }
}

/// One attribute of a table, in column order: `(attalign, avg_width)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub attalign: String,
    pub avg_width: i64,
}

/// Factors retrieved per table for the bloat-ratio estimation.
#[derive(Debug, Clone, PartialEq)]
pub struct BloatFactors {
    pub is_na: bool,
    pub tblpages: f64,
    pub reltuples: f64,
    pub bs: f64,
    pub page_hdr: f64,
    pub fillfactor: f64,
    pub tpl_data_size: f64,
    pub tpl_hdr_size: f64,
    pub ma: i64,
}

/// Total padding between consecutive attributes: each attribute's offset is
/// rounded up to its alignment boundary, and the whole tuple is padded to 4
/// bytes at the end. The slice must be in column order and non-empty.
pub fn padding_size_for_table(attributes: &[AttributeInfo]) -> i64 {
    let mut padding = 0;
    let mut offset = attributes[0].avg_width;
    for attribute in &attributes[1..] {
        let alignment = attalign_bytes(&attribute.attalign);
        let mask = alignment - 1;
        let padded_size = (offset + mask) & !mask;
        padding += padded_size - offset;
        offset = padded_size + attribute.avg_width;
    }
    // tuples align to 4 bytes
    let padded_size = (offset + 3) & !3;
    padding += padded_size - offset;
    padding
}

/// Estimated bloat ratio in percent, `None` when the statistics cannot
/// support an estimate. The result is clamped at 0.
pub fn bloat_ratio(padding_size: i64, factors: &BloatFactors) -> Option<f64> {
    if factors.is_na {
        return None;
    }
    let ma = factors.ma as f64;
    let tpl_data_size = factors.tpl_data_size + padding_size as f64;

    let hdr_rem = factors.tpl_hdr_size % ma;
    let hdr_pad = if hdr_rem == 0.0 { ma } else { hdr_rem };
    let data_rem = tpl_data_size.ceil() % ma;
    let data_pad = if data_rem == 0.0 { ma } else { data_rem };

    let tpl_size = 4.0 + factors.tpl_hdr_size + tpl_data_size + 2.0 * ma - hdr_pad - data_pad;
    let est_tblpages_ff = (factors.reltuples
        / ((factors.bs - factors.page_hdr) * factors.fillfactor / (tpl_size * 100.0)))
        .ceil();

    let ratio = if factors.tblpages - est_tblpages_ff > 0.0 {
        100.0 * (factors.tblpages - est_tblpages_ff) / factors.tblpages
    } else {
        0.0
    };
    Some(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attr(attalign: &str, avg_width: i64) -> AttributeInfo {
        AttributeInfo {
            attalign: attalign.to_string(),
            avg_width,
        }
    }

    #[test]
    fn padding_for_aligned_tuple_is_zero() {
        // int, double, int, int: 4 -> pad 4 before the double, trailing is
        // already 4-aligned after the last int
        let attributes = vec![attr("i", 4), attr("d", 8), attr("i", 4), attr("i", 4)];
        assert_eq!(padding_size_for_table(&attributes), 4);
    }

    #[test]
    fn padding_counts_alignment_holes() {
        // single char column padded up to the 4-byte tuple boundary
        let attributes = vec![attr("c", 1)];
        assert_eq!(padding_size_for_table(&attributes), 3);

        // char followed by double: 7 bytes lost before the double
        let attributes = vec![attr("c", 1), attr("d", 8)];
        assert_eq!(padding_size_for_table(&attributes), 7);
    }

    #[test]
    fn alignment_codes_map_to_bytes() {
        assert_eq!(attalign_bytes("c"), 1);
        assert_eq!(attalign_bytes("s"), 2);
        assert_eq!(attalign_bytes("i"), 4);
        assert_eq!(attalign_bytes("d"), 8);
        assert_eq!(attalign_bytes("?"), 4);
    }

    fn factors() -> BloatFactors {
        BloatFactors {
            is_na: false,
            tblpages: 303_699.0,
            reltuples: 15_243_454.0,
            bs: 8192.0,
            page_hdr: 24.0,
            fillfactor: 100.0,
            tpl_data_size: 147.0,
            tpl_hdr_size: 24.0,
            ma: 8,
        }
    }

    #[test]
    fn bloat_ratio_is_null_iff_is_na() {
        let mut f = factors();
        f.is_na = true;
        assert_eq!(bloat_ratio(0, &f), None);
        assert!(bloat_ratio(0, &factors()).is_some());
    }

    #[test]
    fn bloat_ratio_clamps_at_zero() {
        let mut f = factors();
        // estimated pages exceed the actual heap pages
        f.tblpages = 1.0;
        assert_eq!(bloat_ratio(0, &f), Some(0.0));
    }

    #[test]
    fn bloat_ratio_empty_table_is_zero() {
        let mut f = factors();
        f.tblpages = 0.0;
        f.reltuples = 0.0;
        assert_eq!(bloat_ratio(0, &f), Some(0.0));
    }

    proptest! {
        #[test]
        fn bloat_ratio_stays_in_percent_range(
            tblpages in 0.0f64..1e7,
            reltuples in 0.0f64..1e9,
            tpl_data_size in 1.0f64..4000.0,
            padding in 0i64..512,
            fillfactor in 10.0f64..100.0,
        ) {
            let f = BloatFactors {
                is_na: false,
                tblpages,
                reltuples,
                bs: 8192.0,
                page_hdr: 24.0,
                fillfactor,
                tpl_data_size,
                tpl_hdr_size: 24.0,
                ma: 8,
            };
            let ratio = bloat_ratio(padding, &f).unwrap();
            prop_assert!((0.0..=100.0).contains(&ratio));
        }

        #[test]
        fn padding_is_never_negative(widths in proptest::collection::vec(1i64..64, 1..24)) {
            let attributes: Vec<AttributeInfo> = widths
                .iter()
                .enumerate()
                .map(|(i, w)| attr(["c", "s", "i", "d"][i % 4], *w))
                .collect();
            prop_assert!(padding_size_for_table(&attributes) >= 0);
        }
    }
}
