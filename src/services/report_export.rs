//! CSV and PDF renderings of a [`ReportAnalytics`] snapshot. Both formats
//! read the same [`ReportTable`] list, so they never compute anything the
//! JSON snapshot does not already carry.

use pdf_writer::{Content, Name, Pdf, Rect, Ref, Str};

use crate::error::{AppError, AppResult};
use crate::services::analytics::ReportAnalytics;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 40.0;
const ROW_HEIGHT: f32 = 14.0;
const BODY_SIZE: f32 = 9.0;
const SECTION_SIZE: f32 = 12.0;
const TITLE_SIZE: f32 = 18.0;

const REGULAR: Name<'static> = Name(b"F1");
const BOLD: Name<'static> = Name(b"F2");

#[derive(Debug, Clone, PartialEq)]
pub struct ReportTable {
    pub title: &'static str,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

pub fn report_tables(report: &ReportAnalytics) -> Vec<ReportTable> {
    let summary = &report.summary;
    vec![
        ReportTable {
            title: "Summary",
            headers: vec!["Metric", "Value"],
            rows: vec![
                vec!["Total revenue".to_string(), money(summary.total_revenue)],
                vec![
                    "Revenue change %".to_string(),
                    optional_pct(summary.total_revenue_change_pct),
                ],
                vec!["Occupancy rate %".to_string(), pct(summary.occupancy_rate_pct)],
                vec!["Occupancy".to_string(), summary.occupancy_display.clone()],
                vec![
                    "Avg resolution days".to_string(),
                    pct(summary.avg_resolution_days),
                ],
                vec![
                    "Resolution change %".to_string(),
                    optional_pct(summary.avg_resolution_change_pct),
                ],
                vec!["Open tickets".to_string(), summary.open_tickets.to_string()],
                vec![
                    "Overdue tickets".to_string(),
                    summary.overdue_tickets.to_string(),
                ],
            ],
        },
        ReportTable {
            title: "Revenue Trend",
            headers: vec!["Month", "Revenue", "Expenses"],
            rows: report
                .revenue_trend
                .iter()
                .map(|point| vec![point.month.clone(), money(point.revenue), money(point.expenses)])
                .collect(),
        },
        ReportTable {
            title: "Maintenance Breakdown",
            headers: vec!["Category", "Amount", "Percentage"],
            rows: report
                .maintenance_breakdown
                .iter()
                .map(|row| vec![row.category.clone(), money(row.amount), pct(row.percentage)])
                .collect(),
        },
        ReportTable {
            title: "Tickets by Category",
            headers: vec!["Category", "Closed", "Avg resolution days"],
            rows: report
                .tickets_by_category
                .iter()
                .map(|row| {
                    vec![
                        row.category.clone(),
                        row.count.to_string(),
                        pct(row.avg_resolution_days),
                    ]
                })
                .collect(),
        },
        ReportTable {
            title: "Property Performance",
            headers: vec![
                "Property",
                "Units",
                "Revenue",
                "Maintenance/unit",
                "Occupancy %",
                "Open issues",
            ],
            rows: report
                .property_performance
                .iter()
                .map(|row| {
                    vec![
                        row.property_name.clone(),
                        row.units.to_string(),
                        money(row.revenue),
                        money(row.maintenance_cost),
                        pct(row.occupancy_pct),
                        row.issues.to_string(),
                    ]
                })
                .collect(),
        },
        ReportTable {
            title: "Technician Performance",
            headers: vec![
                "Technician",
                "Tickets",
                "Completed",
                "Overdue",
                "Avg resolution days",
            ],
            rows: report
                .technician_performance
                .iter()
                .map(|row| {
                    vec![
                        row.technician.clone(),
                        row.tickets.to_string(),
                        row.completed.to_string(),
                        row.overdue.to_string(),
                        pct(row.avg_resolution_days),
                    ]
                })
                .collect(),
        },
        ReportTable {
            title: "Outstanding Payments",
            headers: vec!["Unit", "Amount due", "Days overdue", "Status"],
            rows: report
                .outstanding_payments
                .iter()
                .map(|row| {
                    vec![
                        row.unit_label.clone(),
                        money(row.amount_due),
                        row.days_overdue.map(|days| days.to_string()).unwrap_or_default(),
                        row.status.clone(),
                    ]
                })
                .collect(),
        },
        ReportTable {
            title: "Tenant Analytics",
            headers: vec![
                "Scope",
                "Maintenance requests",
                "Late payments",
                "Avg resolution days",
            ],
            rows: report
                .tenant_analytics
                .iter()
                .map(|row| {
                    vec![
                        row.label.clone(),
                        row.maintenance_requests.to_string(),
                        row.late_payments.to_string(),
                        pct(row.avg_resolution_days),
                    ]
                })
                .collect(),
        },
    ]
}

/// One CSV block per section separated by a blank line. Blocks have
/// different widths, so each one is written by its own flexible writer.
pub fn render_csv(report: &ReportAnalytics) -> AppResult<String> {
    let range = &report.range;
    let mut blocks = vec![write_csv_block(
        "Analytics Report",
        &["start_date", "end_date", "property_id", "technician", "generated_at"],
        &[vec![
            range.start_date.to_rfc3339(),
            range.end_date.to_rfc3339(),
            range.property_id.map(|id| id.to_string()).unwrap_or_default(),
            range.technician.clone().unwrap_or_default(),
            range.generated_at.to_rfc3339(),
        ]],
    )?];
    for table in report_tables(report) {
        blocks.push(write_csv_block(table.title, &table.headers, &table.rows)?);
    }
    Ok(blocks.join("\n"))
}

fn write_csv_block(title: &str, headers: &[&str], rows: &[Vec<String>]) -> AppResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record([title]).map_err(csv_error)?;
    writer.write_record(headers).map_err(csv_error)?;
    for row in rows {
        writer.write_record(row).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|error| AppError::Internal(format!("CSV flush error: {error}")))?;
    String::from_utf8(bytes)
        .map_err(|error| AppError::Internal(format!("CSV encoding error: {error}")))
}

fn csv_error(error: csv::Error) -> AppError {
    AppError::Internal(format!("CSV write error: {error}"))
}

pub fn render_pdf(report: &ReportAnalytics) -> Vec<u8> {
    let range = &report.range;
    let mut subtitle = format!(
        "{} to {}",
        range.start_date.format("%Y-%m-%d"),
        range.end_date.format("%Y-%m-%d")
    );
    if let Some(property_id) = range.property_id {
        subtitle.push_str(&format!(" | property {property_id}"));
    }
    if let Some(technician) = &range.technician {
        subtitle.push_str(&format!(" | technician {technician}"));
    }
    subtitle.push_str(&format!(
        " | generated {}",
        range.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    let pages = layout_pages("Analytics Report", &subtitle, &report_tables(report));
    assemble_pdf(pages)
}

fn assemble_pdf(pages: Vec<Content>) -> Vec<u8> {
    let catalog_id = Ref::new(1);
    let page_tree_id = Ref::new(2);
    let regular_id = Ref::new(3);
    let bold_id = Ref::new(4);

    let page_ids = (0..pages.len())
        .map(|index| Ref::new(5 + 2 * index as i32))
        .collect::<Vec<_>>();

    let mut pdf = Pdf::new();
    pdf.catalog(catalog_id).pages(page_tree_id);
    pdf.pages(page_tree_id)
        .kids(page_ids.iter().copied())
        .count(page_ids.len() as i32);

    for (page_id, content) in page_ids.iter().copied().zip(pages) {
        let content_id = Ref::new(page_id.get() + 1);
        {
            let mut page = pdf.page(page_id);
            page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
            page.parent(page_tree_id);
            page.contents(content_id);
            page.resources()
                .fonts()
                .pair(REGULAR, regular_id)
                .pair(BOLD, bold_id);
        }
        pdf.stream(content_id, &content.finish());
    }

    pdf.type1_font(regular_id).base_font(Name(b"Helvetica"));
    pdf.type1_font(bold_id).base_font(Name(b"Helvetica-Bold"));
    pdf.finish()
}

/// Lays the tables out top to bottom, starting a new page whenever the next
/// line would cross the bottom margin.
fn layout_pages(title: &str, subtitle: &str, tables: &[ReportTable]) -> Vec<Content> {
    let mut cursor = PageCursor::new();
    cursor.text(BOLD, TITLE_SIZE, MARGIN, title);
    cursor.advance(TITLE_SIZE + 4.0);
    cursor.text(REGULAR, BODY_SIZE, MARGIN, subtitle);
    cursor.advance(ROW_HEIGHT * 2.0);

    let usable = PAGE_WIDTH - 2.0 * MARGIN;
    for table in tables {
        // Keep a section title together with its header row.
        cursor.ensure_room(SECTION_SIZE + 2.0 * ROW_HEIGHT);
        cursor.text(BOLD, SECTION_SIZE, MARGIN, table.title);
        cursor.advance(SECTION_SIZE + 6.0);

        let column_width = usable / table.headers.len().max(1) as f32;
        cursor.header_row(&table.headers, column_width);
        if table.rows.is_empty() {
            cursor.ensure_room(ROW_HEIGHT);
            cursor.text(REGULAR, BODY_SIZE, MARGIN + 4.0, "No data for this period.");
            cursor.advance(ROW_HEIGHT);
        }
        for row in &table.rows {
            if cursor.ensure_room(ROW_HEIGHT) {
                cursor.header_row(&table.headers, column_width);
            }
            for (index, cell) in row.iter().enumerate() {
                let x = MARGIN + column_width * index as f32 + 4.0;
                cursor.text(REGULAR, BODY_SIZE, x, &fit(cell, column_width, BODY_SIZE));
            }
            cursor.advance(ROW_HEIGHT);
        }
        cursor.advance(ROW_HEIGHT);
    }
    cursor.into_pages()
}

struct PageCursor {
    pages: Vec<Content>,
    current: Content,
    y: f32,
}

impl PageCursor {
    fn new() -> Self {
        Self {
            pages: Vec::new(),
            current: Content::new(),
            y: PAGE_HEIGHT - MARGIN - TITLE_SIZE,
        }
    }

    /// Breaks the page when fewer than `height` points remain. Returns true
    /// when a new page was started.
    fn ensure_room(&mut self, height: f32) -> bool {
        if self.y - height >= MARGIN {
            return false;
        }
        let full = std::mem::replace(&mut self.current, Content::new());
        self.pages.push(full);
        self.y = PAGE_HEIGHT - MARGIN - ROW_HEIGHT;
        true
    }

    fn advance(&mut self, height: f32) {
        self.y -= height;
    }

    fn text(&mut self, font: Name<'static>, size: f32, x: f32, value: &str) {
        let encoded = pdf_text(value);
        self.current
            .begin_text()
            .set_font(font, size)
            .next_line(x, self.y)
            .show(Str(&encoded))
            .end_text();
    }

    fn header_row(&mut self, headers: &[&str], column_width: f32) {
        self.ensure_room(ROW_HEIGHT);
        self.current
            .save_state()
            .set_fill_rgb(0.88, 0.91, 0.95)
            .rect(MARGIN, self.y - 4.0, PAGE_WIDTH - 2.0 * MARGIN, ROW_HEIGHT)
            .fill_nonzero()
            .restore_state();
        for (index, header) in headers.iter().enumerate() {
            let x = MARGIN + column_width * index as f32 + 4.0;
            self.text(BOLD, BODY_SIZE, x, &fit(header, column_width, BODY_SIZE));
        }
        self.advance(ROW_HEIGHT);
    }

    fn into_pages(mut self) -> Vec<Content> {
        self.pages.push(self.current);
        self.pages
    }
}

/// Truncates a cell to roughly what fits in its column at `size` points.
fn fit(value: &str, column_width: f32, size: f32) -> String {
    let max_chars = ((column_width - 8.0) / (size * 0.5)).max(4.0) as usize;
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value.chars().take(max_chars - 3).collect::<String>();
    truncated.push_str("...");
    truncated
}

/// The base-14 fonts only cover Latin text; anything else becomes `?`.
fn pdf_text(value: &str) -> Vec<u8> {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii() && !ch.is_ascii_control() {
                ch as u8
            } else {
                b'?'
            }
        })
        .collect()
}

fn money(value: f64) -> String {
    format!("{value:.2}")
}

fn pct(value: f64) -> String {
    format!("{value:.1}")
}

fn optional_pct(value: Option<f64>) -> String {
    value.map(pct).unwrap_or_else(|| "n/a".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{
        fit, layout_pages, pdf_text, render_csv, render_pdf, report_tables, ReportTable,
    };
    use crate::models::{PropertyRecord, UnitRecord};
    use crate::services::analytics::{build_report, AnalyticsDataset, ReportScope};

    fn sample_report() -> crate::services::analytics::ReportAnalytics {
        let at = |month, day| Utc.with_ymd_and_hms(2026, month, day, 0, 0, 0).unwrap();
        let dataset = AnalyticsDataset {
            properties: vec![PropertyRecord {
                id: 1,
                name: "Maple, Court".to_string(),
                address: None,
                city: None,
                state: None,
                zip: None,
                total_units: 2,
                occupancy: 1,
                manager_name: None,
                status: None,
            }],
            units: vec![UnitRecord {
                id: 7,
                property_id: 1,
                unit_number: 1,
                rent_amount: Some(950.0),
                rent_date: Some(at(3, 1)),
                occupied: true,
                paid: false,
                over_due: true,
            }],
            ..AnalyticsDataset::default()
        };
        let scope = ReportScope {
            start: at(1, 1),
            end: at(3, 31),
            now: at(3, 20),
            property_id: None,
            technician: None,
        };
        build_report(&dataset, &scope)
    }

    #[test]
    fn tables_cover_every_section() {
        let titles = report_tables(&sample_report())
            .into_iter()
            .map(|table| table.title)
            .collect::<Vec<_>>();
        assert_eq!(
            titles,
            vec![
                "Summary",
                "Revenue Trend",
                "Maintenance Breakdown",
                "Tickets by Category",
                "Property Performance",
                "Technician Performance",
                "Outstanding Payments",
                "Tenant Analytics",
            ]
        );
    }

    #[test]
    fn csv_blocks_quote_and_separate_sections() {
        let csv = render_csv(&sample_report()).unwrap();
        assert!(csv.starts_with("Analytics Report\nstart_date,end_date,property_id,technician,generated_at\n"));
        assert!(csv.contains("\n\nSummary\nMetric,Value\nTotal revenue,0.00\n"));
        assert!(csv.contains("Occupancy,1 of 2 units occupied\n"));
        assert!(csv.contains("\"Maple, Court Unit 1\",950.00,19,10-30 days\n"));
        assert!(csv.contains("Revenue Trend\nMonth,Revenue,Expenses\nJan 2026,0.00,0.00\n"));
    }

    #[test]
    fn pdf_is_a_complete_document() {
        let bytes = render_pdf(&sample_report());
        assert!(bytes.starts_with(b"%PDF-"));
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Helvetica-Bold"));
        assert!(text.trim_end().ends_with("%%EOF"));
    }

    #[test]
    fn long_tables_break_across_pages() {
        let table = ReportTable {
            title: "Outstanding Payments",
            headers: vec!["Unit", "Amount due"],
            rows: (1..=120)
                .map(|n| vec![format!("Unit {n}"), "10.00".to_string()])
                .collect(),
        };
        assert_eq!(layout_pages("Report", "range", &[]).len(), 1);
        assert!(layout_pages("Report", "range", &[table]).len() >= 3);
    }

    #[test]
    fn cells_are_truncated_and_ascii_only() {
        assert_eq!(fit("short", 100.0, 9.0), "short");
        let clipped = fit(&"x".repeat(200), 100.0, 9.0);
        assert!(clipped.ends_with("..."));
        assert!(clipped.len() < 30);
        assert_eq!(pdf_text("Caf\u{e9} (2)"), b"Caf? (2)".to_vec());
    }
}
