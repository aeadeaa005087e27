use colored::Colorize;
use std::time::Duration;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// One live result line: `<target> ✓ OK` or `<target> ✗ FAIL`
pub fn outcome_line(target: &str, ok: bool) -> String {
    if ok {
        format!("{target} {} {}", "✓".green(), "OK".green())
    } else {
        format!("{target} {} {}", "✗".red(), "FAIL".red())
    }
}

/// Print one failure with its diagnostic
pub fn failure(target: &str, detail: &str) {
    println!("  {} {} - {}", "✗".red(), target, detail.dimmed());
}

/// Print a unified-style diff of two config bodies, changed lines only
pub fn diff(before: &str, after: &str) {
    let diff = similar::TextDiff::from_lines(before, after);
    let mut has_changes = false;

    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                has_changes = true;
                print!("    {}", format!("- {change}").red());
            }
            similar::ChangeTag::Insert => {
                has_changes = true;
                print!("    {}", format!("+ {change}").green());
            }
            similar::ChangeTag::Equal => {}
        }
    }

    if !has_changes {
        println!("    {}", "(no changes)".dimmed());
    }
}

/// Short human duration: `850ms`, `4.2s`, `2m05s`
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    if millis < 1000 {
        format!("{millis}ms")
    } else if millis < 60_000 {
        format!("{:.1}s", elapsed.as_secs_f64())
    } else {
        let secs = elapsed.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Age of a timestamp relative to now, as shown by `status`
pub fn format_age(generated_at: chrono::DateTime<chrono::Utc>) -> String {
    let age = chrono::Utc::now().signed_duration_since(generated_at);
    format_elapsed(age.to_std().unwrap_or_default())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_line() {
        colored::control::set_override(false);
        assert_eq!(outcome_line("10.0.0.1:7000", true), "10.0.0.1:7000 ✓ OK");
        assert_eq!(outcome_line("10.0.0.2:7000", false), "10.0.0.2:7000 ✗ FAIL");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(850)), "850ms");
        assert_eq!(format_elapsed(Duration::from_millis(4200)), "4.2s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m05s");
    }

    #[test]
    fn test_format_age_future_is_zero() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        assert_eq!(format_age(future), "0ms");
    }
}
