use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "Diğer";

const SECTION_MARKERS: &[&str] = &["LAR", "LER"];
const SECTION_SUFFIXES: &[&str] = &["lar", "ler"];
const NULL_LIMIT: usize = 3;

/// A source row projected onto the canonical fields. `None` is the null marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub group: Option<String>,
    pub product: Option<String>,
    pub price_min: Option<String>,
    pub price_max: Option<String>,
    pub unit: Option<String>,
}

impl CanonicalRow {
    fn null_count(&self) -> usize {
        [&self.product, &self.price_min, &self.price_max, &self.unit]
            .iter()
            .filter(|c| c.is_none())
            .count()
    }
}

/// Strip the lira sign and turn a decimal comma into a point.
pub fn clean_price(cell: &str) -> String {
    cell.replace('₺', "").replace(',', ".").trim().to_string()
}

fn is_null_marker(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell.contains("**") || cell == "nan" || cell == "None"
}

fn nullify(cell: Option<String>) -> Option<String> {
    cell.filter(|c| !is_null_marker(c))
}

fn is_numeric(cell: &Option<String>) -> bool {
    cell.as_deref()
        .and_then(|c| c.parse::<f64>().ok())
        .is_some_and(f64::is_finite)
}

fn is_section_header(row: &CanonicalRow) -> bool {
    if is_numeric(&row.price_min) || is_numeric(&row.price_max) {
        return false;
    }
    row.product.as_deref().is_some_and(|p| {
        let upper = p.to_uppercase();
        SECTION_MARKERS.iter().any(|m| upper.contains(m))
    })
}

fn has_section_suffix(product: &str) -> bool {
    let lower = product.trim().to_lowercase();
    SECTION_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

/// Clean price cells, null out placeholder cells, assign each row to the
/// section heading above it, then drop headings and noise rows.
///
/// Order of surviving rows is preserved.
pub fn sanitize(rows: Vec<CanonicalRow>) -> Vec<CanonicalRow> {
    let mut current = DEFAULT_GROUP.to_string();

    rows.into_iter()
        .map(|mut row| {
            row.price_min = row.price_min.as_deref().map(clean_price);
            row.price_max = row.price_max.as_deref().map(clean_price);
            row.product = nullify(row.product);
            row.price_min = nullify(row.price_min);
            row.price_max = nullify(row.price_max);
            row.unit = nullify(row.unit);
            row
        })
        .filter_map(|mut row| {
            if is_section_header(&row) {
                if let Some(p) = &row.product {
                    current = p.trim().to_string();
                }
                row.group = None;
            } else {
                row.group = Some(current.clone());
            }
            row.group.is_some().then_some(row)
        })
        .filter(|row| row.null_count() < NULL_LIMIT)
        .filter(|row| !row.product.as_deref().is_some_and(has_section_suffix))
        .collect()
}
