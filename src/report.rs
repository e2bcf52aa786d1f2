//! # Report Rendering
//!
//! Text renderings of a scored run:
//!
//! - [`render_summary`] writes the driver summary block. The overall
//!   `<passed>` flag is written as `true` up front and patched in place once
//!   every check below it has been rendered.
//! - [`render_detail`] writes the time series and frequency distribution
//!   sections, one labeled table per series with one column per operation.
//!
//! The response histogram is flattened to a uniform fine resolution before
//! it is charted; see [`flatten_response_histogram`].

use crate::bucket::ResponseBuckets;
use crate::config::RunConfig;
use crate::record::{MetricsRecord, OpId, OpMatrix};
use crate::scoring::DriverSummary;
use std::fmt;
use tracing::debug;

/// Marker appended to background operation names in the summary.
const BACKGROUND_MARKER: &str = " &amp;";

/// Number of leading buckets worth rendering: everything up to the last
/// column with a non-zero count, plus one zero column when that is not the
/// final bucket. An all-zero matrix yields one bucket.
pub fn bucket_limit(matrix: &OpMatrix) -> usize {
    let buckets = matrix.buckets();
    let used = (0..buckets)
        .rev()
        .find(|bucket| !matrix.column_is_zero(*bucket))
        .map_or(0, |bucket| bucket + 1);
    if used < buckets {
        used + 1
    } else {
        used
    }
}

/// Spread every coarse bucket over `ratio` fine-width buckets.
///
/// Fine buckets are copied unchanged. A coarse count splits into
/// `count / ratio` per sub-bucket, with the `count % ratio` highest
/// sub-buckets taking one more, so totals are preserved exactly. Coarse
/// buckets past [`bucket_limit`] are dropped. When the final bucket is in
/// use it is copied unsplit since it also holds everything beyond the
/// coarse range.
pub fn flatten_response_histogram(hist: &OpMatrix, buckets: &ResponseBuckets) -> OpMatrix {
    let fine = buckets.fine_count();
    let ratio = buckets.ratio() as usize;
    let mut limit = bucket_limit(hist);
    if limit <= fine {
        return hist.clone();
    }

    let spare_last = limit == hist.buckets();
    if spare_last {
        limit -= 1;
    }
    let size = (limit - fine) * ratio + fine + usize::from(spare_last);

    let mut flat = OpMatrix::new(hist.ops(), size);
    for op in (0..hist.ops()).map(OpId) {
        let row = hist.row(op);
        for (bucket, count) in row.iter().take(fine).enumerate() {
            flat.set(op, bucket, *count);
        }
        for (coarse, count) in row.iter().enumerate().take(limit).skip(fine) {
            let base = count / ratio as u64;
            let remainder = (count % ratio as u64) as usize;
            let start = (coarse - fine) * ratio + fine;
            for k in 0..ratio {
                let extra = u64::from(k >= ratio - remainder);
                flat.set(op, start + k, base + extra);
            }
        }
        if spare_last {
            flat.set(op, size - 1, row[limit]);
        }
    }
    flat
}

/// Column-aligned text table.
#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(String::len).collect();
        for row in &self.rows {
            for (i, field) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(field.len());
                } else {
                    widths.push(field.len());
                }
            }
        }
        widths
    }
}

fn write_table_row(
    f: &mut fmt::Formatter<'_>,
    columns: &[String],
    widths: &[usize],
) -> fmt::Result {
    write!(f, "|")?;
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        write!(f, " {:>width$} |", column, width = width)?;
    }
    writeln!(f)
}

fn write_table_separator(f: &mut fmt::Formatter<'_>, widths: &[usize]) -> fmt::Result {
    write!(f, "+")?;
    for width in widths {
        write!(f, "{}+", "-".repeat(width + 2))?;
    }
    writeln!(f)
}

impl fmt::Display for TextTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let widths = self.widths();
        write_table_separator(f, &widths)?;
        write_table_row(f, &self.headers, &widths)?;
        write_table_separator(f, &widths)?;
        for row in &self.rows {
            write_table_row(f, row, &widths)?;
        }
        write_table_separator(f, &widths)
    }
}

/// One labeled detail section.
#[derive(Debug, Clone)]
pub struct Series {
    pub label: String,
    pub table: TextTable,
}

fn headers(x_axis: &str, record: &MetricsRecord) -> Vec<String> {
    std::iter::once(x_axis.to_string())
        .chain(record.operations().iter().cloned())
        .collect()
}

/// Graph of `values / divisor` over time.
fn graph_series(
    label: String,
    record: &MetricsRecord,
    values: &OpMatrix,
    rows: usize,
    interval_secs: f64,
    value: impl Fn(OpId, usize) -> String,
) -> Series {
    let mut table = TextTable::new(headers("Time (s)", record));
    for bucket in 0..rows.min(values.buckets()) {
        let mut row = vec![format!("{:.0}", interval_secs * bucket as f64)];
        row.extend((0..record.op_count()).map(|op| value(OpId(op), bucket)));
        table.push_row(row);
    }
    Series { label, table }
}

/// Frequency distribution with raw counts, trimmed to its used buckets.
fn histogram_series(
    label: String,
    record: &MetricsRecord,
    hist: &OpMatrix,
    step: f64,
    precision: usize,
) -> Series {
    let mut table = TextTable::new(headers("Time", record));
    for bucket in 0..bucket_limit(hist) {
        let mut row = vec![format!("{:.*}", precision, step * bucket as f64)];
        row.extend((0..hist.ops()).map(|op| hist.get(OpId(op), bucket).to_string()));
        table.push_row(row);
    }
    Series { label, table }
}

/// Build every detail section of a record.
///
/// Graphs are sized from the run time, so they are only trimmed for cycle
/// controlled runs. Histograms are always trimmed.
pub fn detail_series(record: &MetricsRecord, config: &RunConfig) -> Vec<Series> {
    let unit = config.response_time_unit;
    let precision = unit.nanos() as f64;
    let scheme = record.scheme();
    let interval_secs = scheme.graph.interval_nanos() as f64 / 1e9;
    let trim_graphs = config.run_control.is_cycle_controlled();

    let throughput = record.throughput_graph();
    let throughput_rows = if trim_graphs {
        bucket_limit(throughput)
    } else {
        throughput.buckets()
    };
    let resp_graph = record.response_graph();
    let resp_rows = if trim_graphs {
        bucket_limit(resp_graph)
    } else {
        resp_graph.buckets()
    };

    let flat = flatten_response_histogram(record.response_histogram(), &scheme.response);
    debug!(
        "Flattened response histogram from {} to {} buckets",
        record.response_histogram().buckets(),
        flat.buckets()
    );
    let delay_step = scheme.delay.size() as f64 / 1e9;

    vec![
        graph_series(
            "Throughput".to_string(),
            record,
            throughput,
            throughput_rows,
            interval_secs,
            |op, bucket| format!("{:.2}", throughput.get(op, bucket) as f64 / interval_secs),
        ),
        graph_series(
            format!("Response Times ({})", unit),
            record,
            resp_graph,
            resp_rows,
            interval_secs,
            |op, bucket| {
                let count = throughput.get(op, bucket);
                let value = if count == 0 {
                    0.0
                } else {
                    resp_graph.get(op, bucket) as f64 / (precision * count as f64)
                };
                format!("{:.6}", value)
            },
        ),
        histogram_series(
            format!("Frequency Distribution of Response Times ({})", unit),
            record,
            &flat,
            scheme.response.fine_size() as f64 / precision,
            5,
        ),
        histogram_series(
            "Frequency Distribution of Cycle/Think Times (seconds)".to_string(),
            record,
            record.delay_histogram(),
            delay_step,
            3,
        ),
        histogram_series(
            "Frequency Distribution of Targeted Cycle/Think Times (seconds)".to_string(),
            record,
            record.targeted_delay_histogram(),
            delay_step,
            3,
        ),
    ]
}

/// Render every detail section of a record as text.
pub fn render_detail(record: &MetricsRecord, config: &RunConfig) -> String {
    let mut out = String::new();
    for series in detail_series(record, config) {
        out.push_str(&format!(
            "Section: {} {}\nDisplay: Line\n{}\n",
            config.driver_name, series.label, series.table
        ));
    }
    out
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn push_line(out: &mut String, indent: usize, line: fmt::Arguments<'_>) {
    out.extend(std::iter::repeat(' ').take(indent));
    out.push_str(&line.to_string());
    out.push('\n');
}

fn display_name(name: &str, background: bool) -> String {
    let mut name = escape(name);
    if background {
        name.push_str(BACKGROUND_MARKER);
    }
    name
}

fn optional_tag(
    out: &mut String,
    indent: usize,
    tag: &str,
    value: Option<f64>,
    precision: usize,
    width: usize,
) {
    match value {
        Some(value) => push_line(
            out,
            indent,
            format_args!(
                "<{tag}>{:width$.precision$}</{tag}>",
                value,
                tag = tag,
                width = width,
                precision = precision
            ),
        ),
        None => push_line(out, indent, format_args!("<{}/>", tag)),
    }
}

fn passed_tag(out: &mut String, indent: usize, passed: Option<bool>) {
    match passed {
        Some(passed) => push_line(out, indent, format_args!("<passed>{}</passed>", passed)),
        None => push_line(out, indent, format_args!("<passed/>")),
    }
}

fn timestamp(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Render a driver summary block.
///
/// The verdict is derived from the checks while they are written; the
/// optimistic `<passed>true</passed>` near the top is rewritten to `false`
/// afterwards if any of them failed.
pub fn render_summary(summary: &DriverSummary) -> String {
    let mut out = String::new();
    let mut passed = true;

    push_line(
        &mut out,
        4,
        format_args!("<driverSummary name=\"{}\">", escape(&summary.driver_name)),
    );
    push_line(
        &mut out,
        8,
        format_args!(
            "<metric unit=\"{}\">{:.3}</metric>",
            escape(&summary.metric.unit),
            summary.metric.value
        ),
    );
    push_line(
        &mut out,
        8,
        format_args!("<startTime>{}</startTime>", timestamp(summary.start_time)),
    );
    push_line(
        &mut out,
        8,
        format_args!("<endTime>{}</endTime>", timestamp(summary.end_time)),
    );
    push_line(
        &mut out,
        8,
        format_args!(
            "<totalOps unit=\"{}\">{}</totalOps>",
            escape(&summary.total_ops.unit),
            summary.total_ops.count
        ),
    );
    push_line(&mut out, 8, format_args!("<users>{}</users>", summary.users));
    push_line(&mut out, 8, format_args!("<rtXtps>{:.4}</rtXtps>", summary.rt_x_tps));

    out.push_str("        <passed>");
    let verdict_offset = out.len();
    out.push_str("true</passed>\n");

    push_line(
        &mut out,
        8,
        format_args!("<mix allowedDeviation=\"{:.4}\">", summary.mix.allowed_deviation),
    );
    for check in &summary.mix.operations {
        push_line(
            &mut out,
            12,
            format_args!("<operation name=\"{}\">", display_name(&check.name, check.background)),
        );
        push_line(&mut out, 16, format_args!("<successes>{}</successes>", check.successes));
        push_line(&mut out, 16, format_args!("<failures>{}</failures>", check.failures));
        push_line(&mut out, 16, format_args!("<mix>{:.4}</mix>", check.mix));
        push_line(
            &mut out,
            16,
            format_args!("<requiredMix>{:.4}</requiredMix>", check.required_mix),
        );
        passed_tag(&mut out, 16, Some(check.passed));
        passed &= check.passed;
        push_line(&mut out, 12, format_args!("</operation>"));
    }
    push_line(&mut out, 8, format_args!("</mix>"));

    push_line(
        &mut out,
        8,
        format_args!("<responseTimes unit=\"{}\">", summary.response_times.unit),
    );
    for check in &summary.response_times.operations {
        push_line(
            &mut out,
            12,
            format_args!(
                "<operation name=\"{}\" r90th=\"{:5.3}\">",
                display_name(&check.name, check.background),
                check.target_90th
            ),
        );
        optional_tag(&mut out, 16, "avg", check.avg, 3, 5);
        optional_tag(&mut out, 16, "max", check.max, 3, 5);
        optional_tag(&mut out, 16, "p90th", check.p90th, 3, 5);
        passed_tag(&mut out, 16, check.passed);
        passed &= check.passed != Some(false);
        push_line(&mut out, 12, format_args!("</operation>"));
    }
    push_line(&mut out, 8, format_args!("</responseTimes>"));

    push_line(&mut out, 8, format_args!("<delayTimes>"));
    for check in &summary.delay_times {
        push_line(
            &mut out,
            12,
            format_args!(
                "<operation name=\"{}\" type=\"{}\">",
                display_name(&check.name, check.background),
                check.kind
            ),
        );
        optional_tag(&mut out, 16, "targetedAvg", check.targeted_avg, 3, 0);
        optional_tag(&mut out, 16, "actualAvg", check.actual_avg, 3, 0);
        optional_tag(&mut out, 16, "min", check.min, 3, 0);
        optional_tag(&mut out, 16, "max", check.max, 3, 0);
        passed_tag(&mut out, 16, check.passed);
        passed &= check.passed != Some(false);
        push_line(&mut out, 12, format_args!("</operation>"));
    }
    push_line(&mut out, 8, format_args!("</delayTimes>"));

    if !summary.misc_stats.is_empty() {
        push_line(&mut out, 8, format_args!("<miscStats>"));
        for stat in &summary.misc_stats {
            push_line(&mut out, 12, format_args!("<stat>"));
            for (tag, value, required) in [
                ("description", &stat.description, true),
                ("result", &stat.result, true),
                ("target", &stat.target, false),
                ("allowedDeviation", &stat.allowed_deviation, false),
            ] {
                match value {
                    Some(value) => push_line(
                        &mut out,
                        16,
                        format_args!("<{tag}>{}</{tag}>", escape(value), tag = tag),
                    ),
                    None if required => push_line(&mut out, 16, format_args!("<{}/>", tag)),
                    None => {}
                }
            }
            if let Some(stat_passed) = stat.passed {
                passed_tag(&mut out, 16, Some(stat_passed));
                passed &= stat_passed;
            }
            push_line(&mut out, 12, format_args!("</stat>"));
        }
        push_line(&mut out, 8, format_args!("</miscStats>"));
    }

    push_line(&mut out, 4, format_args!("</driverSummary>"));

    if !passed {
        out.replace_range(verdict_offset..verdict_offset + "true".len(), "false");
    }
    out
}
