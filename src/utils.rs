//! Plain-text tables for terminal output.
use crate::datasets::ClassLabel;
use crate::metrics::{ConfusionMatrix, EvaluationResult};
use crate::split::SplitSummary;
use crate::trainer::MetricsHistory;
use std::fmt::Write;

fn opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |x| format!("{x:.4}"))
}

/// Per-epoch loss/accuracy table.
pub fn history_table(history: &MetricsHistory) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "+-------+------------+-----------+------------+-----------+");
    let _ = writeln!(out, "| Epoch | Train loss | Train acc | Val loss   | Val acc   |");
    let _ = writeln!(out, "+-------+------------+-----------+------------+-----------+");
    for s in history.snapshots() {
        let _ = writeln!(
            out,
            "| {:>5} | {:>10.4} | {:>9.4} | {:>10} | {:>9} |",
            s.epoch,
            s.train_loss,
            s.train_accuracy,
            opt(s.val_loss),
            opt(s.val_accuracy)
        );
    }
    let _ = writeln!(out, "+-------+------------+-----------+------------+-----------+");
    out
}

/// Confusion matrix with actual classes as rows.
pub fn confusion_table<L: ClassLabel>(matrix: &ConfusionMatrix) -> String {
    let width = L::ALL.iter().map(|l| l.name().len()).max().unwrap_or(0).max(6);
    let mut out = String::new();
    let _ = write!(out, "{:<width$} |", "actual");
    for label in L::ALL {
        let _ = write!(out, " {:>width$}", label.name());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "-".repeat((width + 1) * (L::count() + 1) + 1));
    for row in matrix.labeled_cells::<L>() {
        let Some(first) = row.first() else { continue };
        let _ = write!(out, "{:<width$} |", first.actual.name());
        for cell in &row {
            let _ = write!(out, " {:>width$}", cell.count);
        }
        let _ = writeln!(out);
    }
    out
}

/// One-paragraph report of a partition and its evaluation.
pub fn evaluation_report<L: ClassLabel>(summary: SplitSummary, evaluation: &EvaluationResult<L>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "split: {} train / {} validation / {} test",
        summary.train, summary.validation, summary.test
    );
    match (evaluation.test_accuracy, &evaluation.confusion_matrix) {
        (Some(acc), Some(matrix)) => {
            let _ = writeln!(out, "test accuracy: {:.2}%", acc * 100.0);
            out.push_str(&confusion_table::<L>(matrix));
        }
        _ => out.push_str("test split is empty; no evaluation\n"),
    }
    for p in &evaluation.sample_predictions {
        let _ = writeln!(
            out,
            "  #{:<4} {:<11} -> {:<11} {}",
            p.sample.id,
            p.sample.label.name(),
            p.predicted.name(),
            if p.correct { "ok" } else { "miss" }
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Species;

    #[test]
    fn confusion_table_lists_every_class() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 2, 2], &[0, 1, 1, 2], 3);
        let table = confusion_table::<Species>(&cm);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].contains("Versicolor"));
        assert!(lines[3].starts_with("Versicolor"));
        assert!(lines[3].trim_end().ends_with('1'));
    }

    #[test]
    fn empty_history_is_just_the_frame() {
        let table = history_table(&MetricsHistory::default());
        assert_eq!(table.lines().count(), 4);
    }

    #[test]
    fn report_notes_missing_test_split() {
        let summary = SplitSummary { train: 4, validation: 1, test: 0 };
        let report = evaluation_report::<Species>(summary, &EvaluationResult::empty());
        assert!(report.contains("no evaluation"));
    }
}
