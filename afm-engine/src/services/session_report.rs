//! Plain-text session calibration report

use crate::models::{MatchResult, ReviewSummary, SessionCalibration, SessionSummary};

const RULE_WIDTH: usize = 80;

fn calibration_line(label: &str, result: &MatchResult) -> String {
    let masters = if result.master_count > 0 {
        format!(" + {} master(s)", result.master_count)
    } else {
        String::new()
    };
    format!(
        "  {}: {} frames{} (Quality: {:.0}%)",
        label, result.count, masters, result.quality
    )
}

/// Report block for one session
pub fn render_session(summary: &SessionSummary, review: &SessionCalibration) -> String {
    let profile = &review.profile;
    let filter = profile.filter.as_deref().unwrap_or("No Filter");
    let exposure = summary.avg_exposure.unwrap_or(0.0);
    let temp = summary
        .avg_temp
        .map(|t| format!("{:.1}°C", t))
        .unwrap_or_else(|| "unknown".to_string());

    let mut lines = vec![
        "-".repeat(RULE_WIDTH),
        format!("Session: {} - {} - {}", profile.date_loc, profile.object, filter),
        format!("Status: {}", review.status),
        format!(
            "Light Frames: {} | Exposure: {:.1}s | Temp: {} | Binning: {}x{}",
            summary.frame_count, exposure, temp, summary.xbinning, summary.ybinning
        ),
        String::new(),
        calibration_line(&format!("Darks ({:.1}s)", exposure), &review.darks),
        calibration_line("Bias", &review.bias),
        calibration_line(&format!("Flats ({})", filter), &review.flats),
    ];
    if !review.flats.dates.is_empty() && review.flats.dates != [profile.date_loc.clone()] {
        lines.push(format!("  Flats taken: {}", review.flats.dates.join(", ")));
    }

    // Action lines come first; a leading "✓" confirmation (and any optional
    // suggestions after it) needs no section of its own
    let needs_action = review
        .recommendations
        .first()
        .is_some_and(|first| first.starts_with('•'));
    if needs_action {
        lines.push(String::new());
        lines.push("  Recommendations:".to_string());
        lines.extend(review.recommendations.iter().map(|line| format!("    {}", line)));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Summary footer for a batch of sessions
pub fn render_summary(summary: &ReviewSummary) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = format!("{rule}\nSUMMARY\n{rule}\n");
    out.push_str(&format!("Total Sessions: {}\n", summary.total));
    out.push_str(&format!("Complete Sessions: {}\n", summary.complete));
    out.push_str(&format!("Partial Sessions: {}\n", summary.partial));
    out.push_str(&format!("Missing Calibration: {}\n", summary.missing));
    if summary.total > 0 {
        out.push_str(&format!("Completion Rate: {:.1}%\n", summary.completion_rate));
    }
    out
}
