use std::collections::HashMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static TABLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

/// Upper bound for colspan/rowspan so a malformed attribute cannot blow up a row.
const MAX_SPAN: usize = 64;

/// One HTML table as a grid of cell texts. The first row is the header row,
/// kept verbatim; [`RawTable::column_names`] gives the de-duplicated names
/// used for column lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(headers.len()))
            .max()
            .unwrap_or(0);
        let pad = |mut cells: Vec<String>| {
            cells.resize(width, String::new());
            cells
        };
        RawTable {
            headers: pad(headers),
            rows: rows.into_iter().map(pad).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Header names with blanks replaced by `Unnamed: N` and repeats suffixed
    /// `.1`, `.2`, … (`FİYAT (TL)`, `FİYAT (TL).1`).
    pub fn column_names(&self) -> Vec<String> {
        dedup_headers(&self.headers)
    }

    pub fn header_text(&self) -> String {
        self.headers.join(" ")
    }

    pub fn column(&self, idx: usize) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .map(move |row| row.get(idx).map(String::as_str).unwrap_or_default())
    }

    /// Make row `idx` the header row; rows above it are discarded.
    pub fn promote_row(&self, idx: usize) -> Option<RawTable> {
        let header = self.rows.get(idx)?.clone();
        Some(RawTable::new(header, self.rows[idx + 1..].to_vec()))
    }
}

pub fn dedup_headers(headers: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.trim().is_empty() {
                format!("Unnamed: {}", i)
            } else {
                h.trim().to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 {
                base
            } else {
                format!("{}.{}", base, count)
            };
            *count += 1;
            name
        })
        .collect()
}

/// Every `<table>` in document order. Nested tables are parsed separately and
/// their rows do not leak into the enclosing table. Tables without rows are
/// dropped; a table with only a header row is kept (with no data rows).
pub fn parse_tables(html: &str) -> Vec<RawTable> {
    let doc = Html::parse_document(html);
    doc.select(&TABLE)
        .filter_map(|table| {
            let mut grid = table_grid(table);
            if grid.is_empty() {
                return None;
            }
            let headers = grid.remove(0);
            Some(RawTable::new(headers, grid))
        })
        .collect()
}

fn table_grid(table: ElementRef) -> Vec<Vec<String>> {
    let mut grid = Vec::new();
    // Column index → (text, rows still covered) for cells with rowspan > 1.
    let mut spans: Vec<Option<(String, usize)>> = Vec::new();

    for tr in table.select(&ROW).filter(|tr| belongs_to(*tr, table)) {
        let mut cells = tr
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|e| matches!(e.value().name(), "td" | "th"));
        let mut row: Vec<String> = Vec::new();

        loop {
            let col = row.len();
            if let Some(slot) = spans.get_mut(col) {
                if let Some((text, left)) = slot.take() {
                    row.push(text.clone());
                    if left > 1 {
                        *slot = Some((text, left - 1));
                    }
                    continue;
                }
            }

            let Some(cell) = cells.next() else { break };
            let text = cell_text(cell);
            let colspan = span_attr(cell, "colspan");
            let rowspan = span_attr(cell, "rowspan");
            for _ in 0..colspan {
                if rowspan > 1 {
                    let col = row.len();
                    if spans.len() <= col {
                        spans.resize(col + 1, None);
                    }
                    spans[col] = Some((text.clone(), rowspan - 1));
                }
                row.push(text.clone());
            }
        }

        if !row.is_empty() {
            grid.push(row);
        }
    }
    grid
}

fn belongs_to(tr: ElementRef, table: ElementRef) -> bool {
    tr.ancestors()
        .find(|n| n.value().as_element().is_some_and(|e| e.name() == "table"))
        .is_some_and(|n| n.id() == table.id())
}

fn span_attr(cell: ElementRef, name: &str) -> usize {
    cell.value()
        .attr(name)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
        .min(MAX_SPAN)
}

fn cell_text(cell: ElementRef) -> String {
    collapse_ws(&cell.text().collect::<String>())
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub text: String,
    pub href: String,
}

/// All `<a href>` elements in document order.
pub fn anchors(html: &str) -> Vec<Anchor> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if href.is_empty() {
                return None;
            }
            Some(Anchor {
                text: collapse_ws(&a.text().collect::<Vec<_>>().join(" ")),
                href: href.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn first_row_becomes_header() {
        let html = r#"<table>
            <thead><tr><th>Ürünler</th><th>Fiyat (₺/kg)</th></tr></thead>
            <tbody><tr><td>Domates</td><td>20,00₺</td></tr>
                   <tr><td> Biber
                        Sivri </td><td>35₺</td></tr></tbody>
        </table>"#;
        let tables = parse_tables(html);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].headers, strings(&["Ürünler", "Fiyat (₺/kg)"]));
        assert_eq!(tables[0].rows[1], strings(&["Biber Sivri", "35₺"]));
    }

    #[test]
    fn inline_markup_does_not_split_words() {
        let html = r#"<table>
            <tr><th>Ürün</th><th>Fiyat</th></tr>
            <tr><td>Dom<b>ates</b> <i>Salkım</i></td><td>12<small>,50</small>₺</td></tr>
        </table>"#;
        let t = &parse_tables(html)[0];
        assert_eq!(t.rows[0], strings(&["Domates Salkım", "12,50₺"]));
    }

    #[test]
    fn colspan_repeats_cell_text() {
        let html = r#"<table>
            <tr><td colspan="3">TOPTANCI HAL MÜDÜRLÜĞÜ</td></tr>
            <tr><td>ÜRÜN ADI</td><td colspan="2">FİYAT (TL)</td></tr>
        </table>"#;
        let t = &parse_tables(html)[0];
        assert_eq!(t.width(), 3);
        assert_eq!(t.rows[0], strings(&["ÜRÜN ADI", "FİYAT (TL)", "FİYAT (TL)"]));
    }

    #[test]
    fn rowspan_fills_following_rows() {
        let html = r#"<table>
            <tr><th>Grup</th><th>Ad</th></tr>
            <tr><td rowspan="2">Sebze</td><td>Domates</td></tr>
            <tr><td>Biber</td></tr>
        </table>"#;
        let t = &parse_tables(html)[0];
        assert_eq!(t.rows[1], strings(&["Sebze", "Biber"]));
    }

    #[test]
    fn nested_tables_stay_separate() {
        let html = r#"<table>
            <tr><td>outer</td><td><table><tr><td>inner</td></tr><tr><td>x</td></tr></table></td></tr>
            <tr><td>a</td><td>b</td></tr>
        </table>"#;
        let tables = parse_tables(html);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].rows.len(), 1);
        assert_eq!(tables[0].rows[0], strings(&["a", "b"]));
        assert_eq!(tables[1].headers, strings(&["inner"]));
    }

    #[test]
    fn short_rows_are_padded() {
        let t = RawTable::new(strings(&["A", "B", "C"]), vec![strings(&["1"])]);
        assert_eq!(t.rows[0], strings(&["1", "", ""]));
    }

    #[test]
    fn dedup_matches_pandas_style() {
        let names = dedup_headers(&strings(&["FİYAT (TL)", "", "FİYAT (TL)", "FİYAT (TL)"]));
        assert_eq!(
            names,
            strings(&["FİYAT (TL)", "Unnamed: 1", "FİYAT (TL).1", "FİYAT (TL).2"])
        );
    }

    #[test]
    fn promote_row_drops_rows_above() {
        let t = RawTable::new(
            strings(&["x", "y"]),
            vec![strings(&["a", "b"]), strings(&["H1", "H2"]), strings(&["1", "2"])],
        );
        let p = t.promote_row(1).unwrap();
        assert_eq!(p.headers, strings(&["H1", "H2"]));
        assert_eq!(p.rows, vec![strings(&["1", "2"])]);
        assert!(t.promote_row(9).is_none());
    }

    #[test]
    fn anchors_in_order() {
        let html = r#"<a href="/a">Hal  Fiyatları</a><a>no href</a><a href=" //x.com/b ">B</a>"#;
        let links = anchors(html);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].text, "Hal Fiyatları");
        assert_eq!(links[1].href, "//x.com/b");
    }
}
