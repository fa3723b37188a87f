//! Lifelog-domain synonym expansion.
//!
//! Variants substitute one slot at a time, then pairs of slots. At most
//! [`MAX_PER_SLOT`] synonyms are tried per slot and only the first
//! [`MAX_COMBINED_SLOTS`] slots are combined, which bounds the variant count.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use lifelog_core::text::fold_case;

pub const MAX_PER_SLOT: usize = 3;
pub const MAX_COMBINED_SLOTS: usize = 2;

static RE_WORD: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").ok());

static SYNONYMS: LazyLock<HashMap<&'static str, &'static [&'static str]>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    m.insert("meeting", &["call", "sync", "discussion", "standup"]);
    m.insert("call", &["meeting", "phone", "conversation"]);
    m.insert("talk", &["discuss", "conversation", "chat"]);
    m.insert("talked", &["discussed", "spoke", "chatted"]);
    m.insert("said", &["mentioned", "told", "stated"]);
    m.insert("lunch", &["meal", "food", "eat"]);
    m.insert("dinner", &["meal", "food", "supper"]);
    m.insert("eat", &["ate", "lunch", "dinner"]);
    m.insert("project", &["initiative", "work", "task"]);
    m.insert("idea", &["thought", "concept", "proposal"]);
    m.insert("decided", &["agreed", "chose", "concluded"]);
    m.insert("decision", &["choice", "conclusion", "agreement"]);
    m.insert("plan", &["strategy", "roadmap", "schedule"]);
    m.insert("problem", &["issue", "bug", "challenge"]);
    m.insert("issue", &["problem", "bug", "concern"]);
    m.insert("buy", &["purchase", "order", "get"]);
    m.insert("bought", &["purchased", "ordered", "got"]);
    m.insert("todo", &["task", "action", "reminder"]);
    m.insert("task", &["todo", "action", "assignment"]);
    m.insert("doctor", &["appointment", "clinic", "physician"]);
    m.insert("workout", &["exercise", "gym", "training"]);
    m.insert("budget", &["finance", "spending", "costs"]);
    m.insert("boss", &["manager", "lead", "supervisor"]);
    m.insert("feedback", &["review", "comments", "critique"]);
    m.insert("trip", &["travel", "vacation", "journey"]);
    m
});

pub fn synonyms_for(word: &str) -> &'static [&'static str] {
    SYNONYMS.get(fold_case(word).as_str()).copied().unwrap_or(&[])
}

/// Query variants with domain synonyms substituted, deduplicated and never
/// including the query itself.
pub fn expand(query: &str) -> Vec<String> {
    let Some(re) = RE_WORD.as_ref() else { return Vec::new() };
    let slots: Vec<(usize, usize, &'static [&'static str])> = re
        .find_iter(query)
        .filter_map(|m| {
            let syns = synonyms_for(m.as_str());
            (!syns.is_empty()).then(|| (m.start(), m.end(), &syns[..syns.len().min(MAX_PER_SLOT)]))
        })
        .collect();

    let mut variants: Vec<String> = Vec::new();
    let mut push = |v: String| {
        if v != query && !variants.contains(&v) {
            variants.push(v);
        }
    };

    for &(start, end, syns) in &slots {
        for syn in syns {
            push(substitute(query, &[(start, end, *syn)]));
        }
    }

    let combined = &slots[..slots.len().min(MAX_COMBINED_SLOTS)];
    if let [(s1, e1, syns1), (s2, e2, syns2)] = combined {
        for a in *syns1 {
            for b in *syns2 {
                push(substitute(query, &[(*s1, *e1, *a), (*s2, *e2, *b)]));
            }
        }
    }
    variants
}

/// Replaces non-overlapping, start-ordered spans.
fn substitute(query: &str, replacements: &[(usize, usize, &str)]) -> String {
    let mut out = String::with_capacity(query.len() + 16);
    let mut cursor = 0;
    for &(start, end, with) in replacements {
        out.push_str(&query[cursor..start]);
        out.push_str(with);
        cursor = end;
    }
    out.push_str(&query[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_slot_yields_one_variant_per_synonym() {
        let v = expand("team meeting notes");
        assert_eq!(v, vec!["team call notes", "team sync notes", "team discussion notes"]);
    }

    #[test]
    fn two_slots_add_pairwise_combinations() {
        let v = expand("lunch meeting");
        assert_eq!(v.len(), 3 + 3 + 9);
        assert!(v.contains(&"meal call".to_string()));
    }

    #[test]
    fn only_first_two_slots_are_combined() {
        let v = expand("lunch meeting budget");
        assert_eq!(v.len(), 9 + 9);
    }

    #[test]
    fn no_synonyms_no_variants() {
        assert!(expand("quarterly roadmap review").is_empty());
    }
}
