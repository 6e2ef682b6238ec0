//! Process ancestry lookups used to pair terminals with the windows they spawn.

use std::fs;

/// Parent pid of `pid`, or 0 if it cannot be determined
pub fn parent_pid(pid: u32) -> u32 {
    fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| parse_stat_ppid(&stat))
        .unwrap_or(0)
}

/// Extract the parent pid (4th field) from a `/proc/<pid>/stat` line.
///
/// The command name in field 2 is parenthesised and may itself contain
/// spaces or parentheses, so parsing restarts after the last `)`.
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Whether `child` is `ancestor` or one of its descendants
pub fn is_descendant(ancestor: u32, child: u32) -> bool {
    is_descendant_with(ancestor, child, parent_pid)
}

fn is_descendant_with(ancestor: u32, mut child: u32, parent_of: impl Fn(u32) -> u32) -> bool {
    // Bounded so a recycled pid can never form a cycle
    for _ in 0..256 {
        if child == 0 {
            return false;
        }
        if child == ancestor {
            return true;
        }
        child = parent_of(child);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_ppid() {
        assert_eq!(parse_stat_ppid("1234 (bash) S 1000 1234 1234 0 -1"), Some(1000));
        assert_eq!(parse_stat_ppid("42 (my (weird) prog) R 7 42 42"), Some(7));
        assert_eq!(parse_stat_ppid("garbage"), None);
    }

    #[test]
    fn test_is_descendant() {
        // 300 -> 200 -> 100 -> 1
        let parent = |p: u32| match p {
            300 => 200,
            200 => 100,
            100 => 1,
            _ => 0,
        };
        assert!(is_descendant_with(100, 300, parent));
        assert!(is_descendant_with(300, 300, parent));
        assert!(!is_descendant_with(200, 100, parent));
        assert!(!is_descendant_with(100, 0, parent));
    }

    #[test]
    fn test_own_process_descends_from_parent() {
        let me = std::process::id();
        let parent = parent_pid(me);
        assert!(parent > 0);
        assert!(is_descendant(parent, me));
    }
}
