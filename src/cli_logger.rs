use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

const BAR_WIDTH: usize = 24;

pub struct CliLogger {
    json: bool,
    no_color: bool,
}

impl CliLogger {
    pub fn new(json: bool, no_color: bool) -> Self {
        Self { json, no_color }
    }

    pub fn print_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        if self.json {
            println!("{}", serde_json::to_string(&value)?);
            return Ok(());
        }

        if let Some(ranking) = self.render_ranking(&value) {
            println!("{ranking}");
            return Ok(());
        }
        println!("{}", render_value(&value, 0));
        Ok(())
    }

    pub fn print_error(&self, code: &str, msg: &str) {
        if self.json {
            let out = serde_json::json!({
                "status": "error",
                "code": code,
                "message": msg,
            });
            println!("{out}");
            return;
        }
        eprintln!("{} {msg}", self.style("error", "31;1"));
    }

    /// Top-N output (`{run, metric, total, entries: [{name, value}]}`) as a bar chart.
    fn render_ranking(&self, value: &Value) -> Option<String> {
        let entries = value.get("entries")?.as_array()?;
        let total = value.get("total")?.as_u64()?;
        let metric = value.get("metric")?.as_str()?;

        let rows: Vec<(&str, u64)> = entries
            .iter()
            .map(|e| Some((e.get("name")?.as_str()?, e.get("value")?.as_u64()?)))
            .collect::<Option<_>>()?;
        let name_width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

        let mut out = String::new();
        out.push_str(&format!(
            "{} {} {}\n",
            self.style("top", "36;1"),
            self.style(&format!("self {metric}"), "37;1"),
            self.style(&format!("of {total}"), "90"),
        ));
        for (name, v) in rows {
            let share = if total == 0 { 0.0 } else { v as f64 / total as f64 };
            let filled = ((share * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
            out.push_str(&format!(
                "  {name:<name_width$}  {} {v} ({:.1}%)\n",
                self.style(&"#".repeat(filled), "32"),
                share * 100.0
            ));
        }
        Some(out.trim_end().to_string())
    }

    fn style(&self, text: &str, ansi: &str) -> String {
        if self.no_color {
            return text.to_string();
        }
        format!("\x1b[{ansi}m{text}\x1b[0m")
    }
}

fn render_value(value: &Value, indent: usize) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Array(items) => render_array(items, indent),
        Value::Object(map) => render_object(map, indent),
    }
}

fn render_array(items: &[Value], indent: usize) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for item in items {
        if let Some(line) = inline_metrics(item) {
            out.push_str(&format!("{pad}- {line}\n"));
            continue;
        }
        match item {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!("{pad}-\n{}\n", render_value(item, indent + 2)));
            }
            _ => out.push_str(&format!("{pad}- {}\n", render_value(item, indent + 2))),
        }
    }
    out.trim_end().to_string()
}

fn render_object(map: &serde_json::Map<String, Value>, indent: usize) -> String {
    if map.is_empty() {
        return "{}".to_string();
    }

    let pad = " ".repeat(indent);
    let mut out = String::new();
    for (key, value) in map {
        if let Some(line) = inline_metrics(value) {
            out.push_str(&format!("{pad}{key}: {line}\n"));
            continue;
        }
        match value {
            Value::Object(_) | Value::Array(_) => {
                out.push_str(&format!(
                    "{pad}{key}:\n{}\n",
                    render_value(value, indent + 2)
                ));
            }
            _ => out.push_str(&format!(
                "{pad}{key}: {}\n",
                render_value(value, indent + 2)
            )),
        }
    }
    out.trim_end().to_string()
}

/// Metric bundles (`{ct, wt, cpu, mu, pmu}`) render on one line.
fn inline_metrics(value: &Value) -> Option<String> {
    let map = value.as_object()?;
    const FIELDS: [&str; 5] = ["ct", "wt", "cpu", "mu", "pmu"];
    if map.len() != FIELDS.len() || !FIELDS.iter().all(|f| map.contains_key(*f)) {
        return None;
    }
    let parts: Vec<String> = FIELDS
        .iter()
        .map(|f| format!("{f}={}", map[*f]))
        .collect();
    Some(parts.join(" "))
}
