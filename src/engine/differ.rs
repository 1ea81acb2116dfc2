//! Diff display

use colored::Colorize;
use declarative::{DiffSummary, ResourceDiff, ResourceState, group_by_type};

/// Display a list of diffs in a user-friendly format
///
/// Content diffs are shown with `verbose`; directory purges are always shown
/// since they delete files.
pub fn display_diff(diffs: &[ResourceDiff], verbose: bool) {
    if diffs.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Convergence Plan".bold()
    );
    println!("│");

    for (resource_type, type_diffs) in group_by_type(diffs) {
        println!("│ {}", type_name(&resource_type).bold());

        for diff in type_diffs {
            let symbol = match (&diff.current, &diff.desired) {
                (ResourceState::Absent, ResourceState::Present { .. }) => "+".green(),
                (ResourceState::Present { .. }, ResourceState::Absent) => "-".red(),
                (ResourceState::Unknown, _) => "?".dimmed(),
                _ => "~".yellow(),
            };

            println!(
                "│   {} {:<40} {}",
                symbol,
                diff.resource_id,
                state_desc(&diff.current, &diff.desired).dimmed()
            );

            if let Some(detail) = &diff.detail
                && (verbose || diff.resource_type == "directory")
            {
                for line in detail.lines() {
                    println!("│       {}", color_detail(line));
                }
            }
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to add, {} to change, {} unknown)",
        summary.total().to_string().bold(),
        summary.additions.to_string().green(),
        (summary.modifications + summary.removals)
            .to_string()
            .yellow(),
        summary.unknown.to_string().dimmed()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

fn type_name(resource_type: &str) -> &str {
    match resource_type {
        "group" => "Groups",
        "user" => "Users",
        "directory" => "Directories",
        "template" => "Templates",
        "file" => "Config files",
        "archive" => "Release archives",
        "symlink" => "Symlinks",
        "package" => "Packages",
        "unit" => "Init units",
        "service" => "Services",
        other => other,
    }
}

fn state_desc(current: &ResourceState, desired: &ResourceState) -> String {
    match (current, desired) {
        (ResourceState::Absent, ResourceState::Present { details }) => format!(
            "(missing){}",
            details
                .as_ref()
                .map(|d| format!(" → {d}"))
                .unwrap_or_default()
        ),
        (ResourceState::Present { details: from }, ResourceState::Present { details: to }) => {
            format!(
                "{} → {}",
                from.as_deref().unwrap_or("current"),
                to.as_deref().unwrap_or("desired")
            )
        }
        (ResourceState::Modified { from, to }, _) => format!("{from} → {to}"),
        (ResourceState::Present { .. }, ResourceState::Absent) => "(will remove)".to_string(),
        (ResourceState::Unknown, _) => "(state unknown)".to_string(),
        _ => String::new(),
    }
}

fn color_detail(line: &str) -> String {
    if line.starts_with("+++") || line.starts_with("---") {
        line.bold().to_string()
    } else if line.starts_with('+') {
        line.green().to_string()
    } else if line.starts_with('-') {
        line.red().to_string()
    } else if line.starts_with("@@") {
        line.cyan().to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present(details: &str) -> ResourceState {
        ResourceState::Present {
            details: Some(details.to_string()),
        }
    }

    #[test]
    fn test_state_desc() {
        assert_eq!(
            state_desc(&ResourceState::Absent, &present("running, enabled")),
            "(missing) → running, enabled"
        );
        assert_eq!(
            state_desc(
                &ResourceState::Modified {
                    from: "stopped, enabled".into(),
                    to: "running, enabled".into(),
                },
                &present("running, enabled")
            ),
            "stopped, enabled → running, enabled"
        );
        assert_eq!(
            state_desc(&ResourceState::Unknown, &present("x")),
            "(state unknown)"
        );
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name("template"), "Templates");
        assert_eq!(type_name("something_else"), "something_else");
    }
}
