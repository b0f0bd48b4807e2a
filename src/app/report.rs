//! Report rendering.
//!
//! Takes the set of actions a principal performed and the set it was granted
//! and prints a line-per-action diff. Output goes through any `Write` sink so
//! the renderers can be exercised directly in tests.

use anyhow::Result;
use colored::{Color, Colorize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use super::actions::{cloudtrail_to_iam, is_no_iam};

/// Which report rows to keep.
#[derive(Debug, Clone, Copy)]
pub struct PrintFilter {
    /// Only show privileges that were used.
    pub show_used: bool,
    /// Show list/describe style actions that can't exfil or modify resources.
    pub show_benign: bool,
    /// Show granted privileges CloudTrail doesn't record.
    pub show_unknown: bool,
}

impl Default for PrintFilter {
    fn default() -> Self {
        Self {
            show_used: false,
            show_benign: true,
            show_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ActionClass {
    PerformedAndAllowed,
    PerformedButNotAllowed,
    AllowedButNotPerformed,
    AllowedButNotKnownIfPerformed,
}

fn colored_println<W: Write>(out: &mut W, text: &str, use_color: bool, color: Color) -> Result<()> {
    if use_color {
        writeln!(out, "{}", text.color(color))?;
    } else {
        writeln!(out, "{}", text)?;
    }
    Ok(())
}

/// Print which principals that exist in the account actually did anything.
///
/// Principals that acted but no longer exist in IAM are suppressed; the
/// snapshot is current while the logs cover the past.
pub fn print_actor_diff<W: Write>(
    out: &mut W,
    performed_actors: &HashSet<String>,
    allowed_actors: &[String],
    use_color: bool,
) -> Result<()> {
    let mut actors = BTreeMap::new();

    for actor in performed_actors {
        if allowed_actors.iter().any(|allowed| allowed == actor) {
            actors.insert(actor.clone(), ActionClass::PerformedAndAllowed);
        } else {
            actors.insert(actor.clone(), ActionClass::PerformedButNotAllowed);
        }
    }
    for actor in allowed_actors {
        actors
            .entry(actor.clone())
            .or_insert(ActionClass::AllowedButNotPerformed);
    }

    for (actor, class) in &actors {
        match class {
            ActionClass::PerformedAndAllowed => {
                colored_println(out, &format!("  {}", actor), use_color, Color::White)?
            }
            // Actors that existed but have since been deleted
            ActionClass::PerformedButNotAllowed => continue,
            ActionClass::AllowedButNotPerformed => {
                colored_println(out, &format!("- {}", actor), use_color, Color::Red)?
            }
            ActionClass::AllowedButNotKnownIfPerformed => unreachable!(),
        }
    }

    Ok(())
}

/// Print the per-action diff for one principal.
///
/// Every shown action gets exactly one label: performed and allowed (no
/// prefix), performed but not granted (`+`), granted but never seen (`-`),
/// or granted but not recorded by CloudTrail (`?`).
pub fn print_diff<W: Write>(
    out: &mut W,
    performed_actions: &HashSet<String>,
    allowed_actions: &HashSet<String>,
    cloudtrail_supported: &HashSet<String>,
    filter: &PrintFilter,
    use_color: bool,
) -> Result<()> {
    let mut actions = BTreeMap::new();

    for action in performed_actions {
        let action = cloudtrail_to_iam(action);

        if allowed_actions.contains(&action) {
            actions.insert(action, ActionClass::PerformedAndAllowed);
        } else {
            // Calls like sts:getcalleridentity are allowed whether or not
            // IAM grants them; not worth reporting.
            if is_no_iam(&action) {
                continue;
            }
            actions.insert(action, ActionClass::PerformedButNotAllowed);
        }
    }

    for action in allowed_actions {
        if actions.contains_key(action) {
            continue;
        }
        if !cloudtrail_supported.contains(action) {
            actions.insert(action.clone(), ActionClass::AllowedButNotKnownIfPerformed);
        } else {
            actions.insert(action.clone(), ActionClass::AllowedButNotPerformed);
        }
    }

    for (action, class) in &actions {
        if !filter.show_benign && (action.contains(":list") || action.contains(":describe")) {
            continue;
        }

        match class {
            ActionClass::PerformedAndAllowed => {
                colored_println(out, &format!("  {}", action), use_color, Color::White)?
            }
            ActionClass::PerformedButNotAllowed => {
                colored_println(out, &format!("+ {}", action), use_color, Color::Green)?
            }
            ActionClass::AllowedButNotPerformed => {
                if filter.show_used {
                    continue;
                }
                colored_println(out, &format!("- {}", action), use_color, Color::Red)?
            }
            ActionClass::AllowedButNotKnownIfPerformed => {
                if filter.show_used || !filter.show_unknown {
                    continue;
                }
                colored_println(out, &format!("? {}", action), use_color, Color::Yellow)?
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_actor_diff(performed: &[&str], allowed: &[&str]) -> String {
        let performed: HashSet<String> = performed.iter().map(|s| s.to_string()).collect();
        let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        print_actor_diff(&mut out, &performed, &allowed, false).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn actor_diff_marks_inactive_actors() {
        assert_eq!(render_actor_diff(&[], &[]), "");
        assert_eq!(
            render_actor_diff(&["alice", "bob"], &["alice", "bob", "charlie"]),
            "  alice\n  bob\n- charlie\n"
        );
    }

    #[test]
    fn deleted_actors_are_suppressed() {
        assert_eq!(render_actor_diff(&["mallory", "alice"], &["alice"]), "  alice\n");
    }
}
