// FITS header card store. A FITS header is an ordered collection of
// keyword/value/comment cards where keywords are unique: inserting a
// card whose keyword already exists overwrites the value, units, and
// comment in place without changing the card's position or the total
// card count. Grounded on ccd_fits_header.c's Fits_Header_Struct /
// CCD_Fits_Header_Add_* family, which has the identical
// find-then-update-or-append behaviour (`fits_update_key` semantics).

use std::fmt;

/// The typed value a FITS card can hold. Comment-only cards (no `=`)
/// are represented separately by `FitsHeader::add_comment`.
#[derive(Debug, Clone, PartialEq)]
pub enum FitsValue {
    String(String),
    Int(i64),
    Float(f64),
    Logical(bool),
}

impl fmt::Display for FitsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitsValue::String(s) => write!(f, "'{}'", s),
            FitsValue::Int(v) => write!(f, "{}", v),
            FitsValue::Float(v) => write!(f, "{:E}", v),
            FitsValue::Logical(v) => write!(f, "{}", if *v { "T" } else { "F" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitsCard {
    pub keyword: String,
    pub value: FitsValue,
    pub units: Option<String>,
    pub comment: Option<String>,
}

/// An ordered, keyword-unique collection of FITS header cards.
///
/// Cards keep their original insertion order; re-inserting an existing
/// keyword updates the card in place rather than moving it to the end.
#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    cards: Vec<FitsCard>,
}

impl FitsHeader {
    pub fn new() -> Self {
        FitsHeader { cards: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.cards.clear();
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn get(&self, keyword: &str) -> Option<&FitsCard> {
        self.cards.iter().find(|c| c.keyword == keyword)
    }

    pub fn delete(&mut self, keyword: &str) -> bool {
        let before = self.cards.len();
        self.cards.retain(|c| c.keyword != keyword);
        self.cards.len() != before
    }

    fn upsert(&mut self, keyword: &str, value: FitsValue, comment: Option<&str>) {
        if let Some(card) = self.cards.iter_mut().find(|c| c.keyword == keyword) {
            card.value = value;
            card.comment = comment.map(str::to_string);
        } else {
            self.cards.push(FitsCard {
                keyword: keyword.to_string(),
                value,
                units: None,
                comment: comment.map(str::to_string),
            });
        }
    }

    pub fn add_string(&mut self, keyword: &str, value: &str, comment: Option<&str>) {
        self.upsert(keyword, FitsValue::String(value.to_string()), comment);
    }

    pub fn add_int(&mut self, keyword: &str, value: i64, comment: Option<&str>) {
        self.upsert(keyword, FitsValue::Int(value), comment);
    }

    pub fn add_float(&mut self, keyword: &str, value: f64, comment: Option<&str>) {
        self.upsert(keyword, FitsValue::Float(value), comment);
    }

    pub fn add_logical(&mut self, keyword: &str, value: bool, comment: Option<&str>) {
        self.upsert(keyword, FitsValue::Logical(value), comment);
    }

    /// Attaches a units string to an already-present card, for the
    /// rare keywords (VSHIFT, HSHIFT) whose comment field doubles as a
    /// units annotation.
    pub fn set_units(&mut self, keyword: &str, units: &str) {
        if let Some(card) = self.cards.iter_mut().find(|c| c.keyword == keyword) {
            card.units = Some(units.to_string());
        }
    }

    pub fn cards(&self) -> &[FitsCard] {
        &self.cards
    }

    /// Renders the header as a sequence of 80-column FITS cards,
    /// terminated by `END`, NOT padded to a 2880-byte block boundary
    /// (that padding is `fits_writer`'s job once SIMPLE/BITPIX/NAXIS*
    /// cards are prepended).
    pub fn render_cards(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.cards.len() + 1);
        for card in &self.cards {
            lines.push(render_card(card));
        }
        lines.push(format!("{:<80}", "END"));
        lines
    }
}

fn render_card(card: &FitsCard) -> String {
    let mut line = format!("{:<8}= {:>20}", card.keyword, card.value.to_string());
    if let Some(comment) = &card.comment {
        line.push_str(" / ");
        line.push_str(comment);
    } else if let Some(units) = &card.units {
        line.push_str(" / ");
        line.push_str(units);
    }
    if line.len() > 80 {
        line.truncate(80);
    } else {
        line = format!("{:<80}", line);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_overwrite_preserves_position_and_count() {
        let mut h = FitsHeader::new();
        h.add_int("EXPTIME", 1, None);
        h.add_string("HEAD", "iKon-L", None);
        h.add_int("SERNO", 12345, None);
        assert_eq!(h.len(), 3);

        h.add_int("EXPTIME", 30, Some("seconds"));
        assert_eq!(h.len(), 3);
        assert_eq!(h.cards()[0].keyword, "EXPTIME");
        assert_eq!(h.get("EXPTIME").unwrap().value, FitsValue::Int(30));
        assert_eq!(h.get("EXPTIME").unwrap().comment.as_deref(), Some("seconds"));
    }

    #[test]
    fn delete_removes_card() {
        let mut h = FitsHeader::new();
        h.add_int("HBIN", 2, None);
        assert!(h.delete("HBIN"));
        assert!(!h.delete("HBIN"));
        assert!(h.get("HBIN").is_none());
    }

    #[test]
    fn vbin_is_grounded_on_bin_y_not_bin_x() {
        // Regression guard for the redesign flag: callers must source
        // VBIN from the vertical binning factor, not the horizontal one.
        let bin_x = 2u32;
        let bin_y = 4u32;
        let mut h = FitsHeader::new();
        h.add_int("HBIN", bin_x as i64, None);
        h.add_int("VBIN", bin_y as i64, None);
        assert_eq!(h.get("VBIN").unwrap().value, FitsValue::Int(4));
    }

    #[test]
    fn render_cards_ends_with_end_card() {
        let mut h = FitsHeader::new();
        h.add_int("NAXIS", 2, None);
        let lines = h.render_cards();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines.last().unwrap().trim_end(), "END");
        for line in &lines {
            assert_eq!(line.len(), 80);
        }
    }

    #[test]
    fn clear_empties_header() {
        let mut h = FitsHeader::new();
        h.add_int("NAXIS", 2, None);
        h.clear();
        assert!(h.is_empty());
    }
}
