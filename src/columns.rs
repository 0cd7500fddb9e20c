use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::MissingColumns;
use crate::normalize::{normalize, normalize_display};
use crate::sanitize::CanonicalRow;

/// Mapped fields of the canonical schema. The category is derived by the
/// classifier, never read from the source, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Product,
    PriceMin,
    PriceMax,
    Unit,
}

impl Field {
    /// Column title used in exports.
    pub fn label(&self) -> &'static str {
        match self {
            Field::Product => "Ürün Adı",
            Field::PriceMin => "En Düşük Fiyat (TL)",
            Field::PriceMax => "En Yüksek Fiyat (TL)",
            Field::Unit => "Birim",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub field: Field,
    pub aliases: &'static [&'static str],
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(field: Field, aliases: &'static [&'static str]) -> Self {
        FieldSpec {
            field,
            aliases,
            required: true,
        }
    }

    pub const fn optional(field: Field, aliases: &'static [&'static str]) -> Self {
        FieldSpec {
            field,
            aliases,
            required: false,
        }
    }
}

/// Result of [`map_columns`]: canonical field → source column index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: Vec<(Field, usize)>,
}

impl ColumnMapping {
    pub fn index(&self, field: Field) -> Option<usize> {
        self.columns
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, i)| *i)
    }

    pub fn raw_header<'a>(&self, field: Field, headers: &'a [String]) -> Option<&'a str> {
        self.index(field)
            .and_then(|i| headers.get(i))
            .map(String::as_str)
    }

    /// Pull the mapped cells out of a source row. `fixed_unit` replaces the
    /// unit cell for sources whose unit is constant.
    pub fn project(&self, row: &[String], fixed_unit: Option<&str>) -> CanonicalRow {
        let cell = |field| {
            self.index(field)
                .and_then(|i| row.get(i))
                .map(|s| s.to_string())
        };
        CanonicalRow {
            group: None,
            product: cell(Field::Product),
            price_min: cell(Field::PriceMin),
            price_max: cell(Field::PriceMax),
            unit: fixed_unit.map(str::to_string).or_else(|| cell(Field::Unit)),
        }
    }
}

/// Map source headers onto the schema.
///
/// Fields are resolved in schema order; each alias is tried in order against
/// the headers not yet taken, first by exact equality, then alias-in-header,
/// then header-in-alias, all on [`normalize`]d text. A header is never given
/// to two fields. Every required field left unmatched is reported.
pub fn map_columns<H: Display>(
    headers: &[H],
    schema: &[FieldSpec],
) -> Result<ColumnMapping, MissingColumns> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_display(h).trim().to_string()).collect();
    let mut used = vec![false; headers.len()];
    let mut mapping = ColumnMapping::default();
    let mut missing = Vec::new();

    for spec in schema {
        let hit = spec.aliases.iter().find_map(|alias| {
            let alias = normalize(alias).trim().to_string();
            if alias.is_empty() {
                return None;
            }
            find_header(&alias, &normalized, &used)
        });
        match hit {
            Some(i) => {
                used[i] = true;
                mapping.columns.push((spec.field, i));
            }
            None if spec.required => missing.push(spec.field),
            None => {}
        }
    }

    if missing.is_empty() {
        Ok(mapping)
    } else {
        Err(MissingColumns { missing })
    }
}

fn find_header(alias: &str, headers: &[String], used: &[bool]) -> Option<usize> {
    let free = || {
        headers
            .iter()
            .enumerate()
            .filter(|(i, h)| !used[*i] && !h.is_empty())
    };
    free()
        .find(|(_, h)| h.as_str() == alias)
        .or_else(|| free().find(|(_, h)| h.contains(alias)))
        .or_else(|| free().find(|(_, h)| alias.contains(h.as_str())))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    const DERNEK: &[FieldSpec] = &[
        FieldSpec::required(Field::Product, &["ÜRÜN ADI"]),
        FieldSpec::required(Field::Unit, &["BİRİMİ (KG)"]),
        FieldSpec::required(Field::PriceMin, &["FİYAT (TL)", "En Düşük Fiyat (TL)"]),
        FieldSpec::required(Field::PriceMax, &["FİYAT (TL).1", "En Yüksek Fiyat (TL)"]),
    ];

    #[test]
    fn deduplicated_price_column_maps_to_max() {
        let headers = strings(&["ÜRÜN ADI", "BİRİMİ (KG)", "FİYAT (TL)", "FİYAT (TL).1"]);
        let m = map_columns(&headers, DERNEK).unwrap();
        assert_eq!(m.raw_header(Field::PriceMax, &headers), Some("FİYAT (TL).1"));
        assert_eq!(m.raw_header(Field::PriceMin, &headers), Some("FİYAT (TL)"));
        assert_eq!(m.raw_header(Field::Product, &headers), Some("ÜRÜN ADI"));
    }

    #[test]
    fn alias_list_resolves_dedup_suffix_alone() {
        let schema = [FieldSpec::required(
            Field::PriceMax,
            &["FİYAT (TL).1", "En Yüksek Fiyat (TL)"],
        )];
        let headers = strings(&["FİYAT (TL).1"]);
        let m = map_columns(&headers, &schema).unwrap();
        assert_eq!(m.raw_header(Field::PriceMax, &headers), Some("FİYAT (TL).1"));
    }

    #[test]
    fn exact_match_beats_containment() {
        // "fiyat (tl)" is contained in the first header, but equals the second.
        let headers = strings(&["FİYAT (TL).1", "Fiyat (TL)"]);
        let schema = [FieldSpec::required(Field::PriceMin, &["FİYAT (TL)"])];
        let m = map_columns(&headers, &schema).unwrap();
        assert_eq!(m.index(Field::PriceMin), Some(1));
    }

    #[test]
    fn header_inside_alias_is_last_resort() {
        let headers = strings(&["Mal Adı", "Birimi", "En Az", "En Çok"]);
        let schema = [
            FieldSpec::required(Field::Product, &["Adı"]),
            FieldSpec::required(Field::Unit, &["Birim"]),
            FieldSpec::required(Field::PriceMin, &["En Az Fiyat"]),
            FieldSpec::required(Field::PriceMax, &["En Çok Fiyat"]),
        ];
        let m = map_columns(&headers, &schema).unwrap();
        assert_eq!(m.index(Field::Product), Some(0));
        assert_eq!(m.index(Field::Unit), Some(1));
        assert_eq!(m.index(Field::PriceMin), Some(2));
        assert_eq!(m.index(Field::PriceMax), Some(3));
    }

    #[test]
    fn header_never_assigned_twice() {
        let headers = strings(&["Fiyat"]);
        let schema = [
            FieldSpec::required(Field::PriceMin, &["Fiyat"]),
            FieldSpec::optional(Field::PriceMax, &["Fiyat"]),
        ];
        let m = map_columns(&headers, &schema).unwrap();
        assert_eq!(m.index(Field::PriceMin), Some(0));
        assert_eq!(m.index(Field::PriceMax), None);
    }

    #[test]
    fn reports_all_missing_required_fields() {
        let headers = strings(&["ÜRÜN ADI", "Unnamed: 1"]);
        let err = map_columns(&headers, DERNEK).unwrap_err();
        assert_eq!(
            err.missing,
            vec![Field::Unit, Field::PriceMin, Field::PriceMax]
        );
    }

    #[test]
    fn blank_headers_are_ignored() {
        let headers = strings(&["", "Ürünler"]);
        let schema = [FieldSpec::required(Field::Product, &["Ürünler"])];
        assert_eq!(map_columns(&headers, &schema).unwrap().index(Field::Product), Some(1));
    }

    #[test]
    fn project_applies_fixed_unit() {
        let headers = strings(&["ÜRÜN ADI", "BİRİMİ (KG)", "FİYAT (TL)", "FİYAT (TL).1"]);
        let m = map_columns(&headers, DERNEK).unwrap();
        let row = m.project(&strings(&["Domates", "", "10", "12"]), Some("KG"));
        assert_eq!(row.product.as_deref(), Some("Domates"));
        assert_eq!(row.price_max.as_deref(), Some("12"));
        assert_eq!(row.unit.as_deref(), Some("KG"));
    }
}
