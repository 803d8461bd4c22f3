//! Stats report types and terminal formatting.
//!
//! A report renders as text (Display) or serializes as JSON.

use serde::Serialize;
use std::fmt;

/// The result of computing dataset statistics.
#[derive(Clone, Debug, Serialize)]
pub struct StatsReport {
    pub summary: SummarySection,
    /// Item and annotation counts per subset, by subset name.
    pub subsets: Vec<SubsetCount>,
    /// Annotation counts per variant, most frequent first.
    pub types: Vec<TypeCount>,
    /// Label distribution histogram.
    pub labels: LabelsSection,
    pub masks: MaskStats,
    /// Display-only option for histogram rendering width.
    #[serde(skip)]
    pub(crate) bar_width: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SummarySection {
    pub items: usize,
    pub subsets: usize,
    pub categories: usize,
    pub annotations: usize,
    /// Items with no annotation at all.
    pub unannotated_items: usize,
    pub items_with_media: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubsetCount {
    pub name: String,
    pub items: usize,
    pub annotations: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: usize,
}

/// Label distribution section.
#[derive(Clone, Debug, Default, Serialize)]
pub struct LabelsSection {
    /// How many top labels to show.
    pub top_n: usize,
    /// Distinct labels used by at least one annotation.
    pub total_distinct: usize,
    /// Top label entries (sorted by count descending).
    pub entries: Vec<LabelCount>,
    /// Sum of counts for labels not in the top N.
    pub other_count: usize,
    /// Annotations without a label.
    pub unlabeled: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct LabelCount {
    pub label: String,
    pub count: usize,
}

/// Raster annotation statistics.
#[derive(Clone, Debug, Default, Serialize)]
pub struct MaskStats {
    /// Mask, instance mask and part mask annotations.
    pub total: usize,
    pub empty: usize,
    pub instances: usize,
    pub parts: usize,
    /// Largest number of instances in one item.
    pub max_instances_per_item: usize,
    /// Mean foreground pixels per non-empty mask.
    pub mean_area: Option<f64>,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Dataset Stats Report")?;
        writeln!(f, "====================")?;
        writeln!(f)?;
        self.fmt_summary(f)?;
        writeln!(f)?;
        self.fmt_subsets(f)?;
        writeln!(f)?;
        self.fmt_types(f)?;
        writeln!(f)?;
        self.fmt_labels(f)?;
        writeln!(f)?;
        self.fmt_masks(f)
    }
}

impl StatsReport {
    fn fmt_summary(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f, "┌─ Summary")?;
        writeln!(f, "│   Items:        {:>10}", format_number(s.items))?;
        writeln!(f, "│   Subsets:      {:>10}", format_number(s.subsets))?;
        writeln!(f, "│   Categories:   {:>10}", format_number(s.categories))?;
        writeln!(f, "│   Annotations:  {:>10}", format_number(s.annotations))?;
        writeln!(
            f,
            "│   Unannotated:  {:>10} ({})",
            format_number(s.unannotated_items),
            fmt_percent(s.unannotated_items, s.items)
        )?;
        writeln!(
            f,
            "│   With media:   {:>10} ({})",
            format_number(s.items_with_media),
            fmt_percent(s.items_with_media, s.items)
        )?;
        writeln!(f, "└─")
    }

    fn fmt_subsets(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ Subsets ({})", self.subsets.len())?;
        for subset in &self.subsets {
            writeln!(
                f,
                "│   {:<20} {:>10} item(s) {:>10} annotation(s)",
                truncate_label(&subset.name, 20),
                format_number(subset.items),
                format_number(subset.annotations)
            )?;
        }
        writeln!(f, "└─")
    }

    fn fmt_types(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ Annotation types")?;
        let max = self.types.iter().map(|t| t.count).max().unwrap_or(0);
        for entry in &self.types {
            writeln!(
                f,
                "│   {:<14} {}{:>10}",
                entry.kind,
                pad_bar(&render_bar(entry.count, max, self.bar_width), self.bar_width),
                format_number(entry.count)
            )?;
        }
        writeln!(f, "└─")
    }

    fn fmt_labels(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let l = &self.labels;
        if l.total_distinct > l.top_n {
            writeln!(f, "┌─ Labels (top {} of {})", l.top_n, l.total_distinct)?;
        } else {
            writeln!(f, "┌─ Labels ({})", l.total_distinct)?;
        }

        if l.entries.is_empty() {
            writeln!(f, "│   (no labeled annotations)")?;
        }
        let max = l.entries.first().map(|e| e.count).unwrap_or(0);
        for entry in &l.entries {
            writeln!(
                f,
                "│   {:<20} {}{:>10}",
                truncate_label(&entry.label, 20),
                pad_bar(&render_bar(entry.count, max, self.bar_width), self.bar_width),
                format_number(entry.count)
            )?;
        }
        if l.other_count > 0 {
            writeln!(f, "│   {:<20} {:>10}", "(other)", format_number(l.other_count))?;
        }
        if l.unlabeled > 0 {
            writeln!(f, "│   {:<20} {:>10}", "(unlabeled)", format_number(l.unlabeled))?;
        }
        writeln!(f, "└─")
    }

    fn fmt_masks(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.masks;
        writeln!(f, "┌─ Masks")?;
        writeln!(f, "│   Total:               {:>10}", format_number(m.total))?;
        writeln!(f, "│   Instances:           {:>10}", format_number(m.instances))?;
        writeln!(f, "│   Parts:               {:>10}", format_number(m.parts))?;
        writeln!(f, "│   Empty:               {:>10}", format_number(m.empty))?;
        writeln!(
            f,
            "│   Max instances/item:  {:>10}",
            format_number(m.max_instances_per_item)
        )?;
        match m.mean_area {
            Some(area) => writeln!(f, "│   Mean area (px):      {:>10.1}", area)?,
            None => writeln!(f, "│   Mean area (px):             n/a")?,
        }
        writeln!(f, "└─")
    }
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Format a percentage, handling zero denominators.
fn fmt_percent(numerator: usize, denominator: usize) -> String {
    if denominator == 0 {
        "n/a".to_string()
    } else {
        format!("{:.1}%", (numerator as f64 / denominator as f64) * 100.0)
    }
}

fn render_bar(count: usize, max_count: usize, width: usize) -> String {
    if max_count == 0 || width == 0 {
        return String::new();
    }

    let filled = (count * width) / max_count;
    let filled = filled.min(width);
    "█".repeat(filled) + &"░".repeat(width - filled)
}

/// Pad a bar string to ensure consistent column alignment.
fn pad_bar(bar: &str, width: usize) -> String {
    let visual_len = bar.chars().count();
    let padding = (width + 2).saturating_sub(visual_len);
    format!("{}{}", bar, " ".repeat(padding))
}

fn truncate_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        label.to_string()
    } else {
        let kept: String = label.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_grouped() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn bars_scale_to_the_maximum() {
        assert_eq!(render_bar(5, 10, 4), "██░░");
        assert_eq!(render_bar(1, 0, 4), "");
    }

    #[test]
    fn long_labels_are_truncated() {
        assert_eq!(truncate_label("traffic light", 8), "traffic…");
        assert_eq!(truncate_label("car", 8), "car");
    }
}
