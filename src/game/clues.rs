//! Fixed clue set and the shared substitution cipher

use std::collections::BTreeMap;

use serde::Serialize;

/// Shift applied by the shared Caesar cipher
pub const CIPHER_SHIFT: u8 = 3;

/// A puzzle held by the server. The plaintext never leaves this module
/// except through comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clue {
    pub id: u32,
    pub location: &'static str,
    solution: &'static str,
    pub encrypted: &'static str,
}

impl Clue {
    const fn new(
        id: u32,
        location: &'static str,
        solution: &'static str,
        encrypted: &'static str,
    ) -> Self {
        Self {
            id,
            location,
            solution,
            encrypted,
        }
    }

    /// Compare a submission against the solution. Both sides are trimmed and
    /// upper-cased so client casing never causes a false negative.
    pub fn is_solved_by(&self, submission: &str) -> bool {
        normalize(submission) == normalize(self.solution)
    }

    /// What a spy is allowed to see
    pub fn public_view(&self) -> ClueView {
        ClueView {
            id: self.id,
            location: self.location,
            encrypted: self.encrypted,
        }
    }

    #[cfg(test)]
    pub fn solution(&self) -> &'static str {
        self.solution
    }
}

/// Clue payload sent to a spy on request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClueView {
    pub id: u32,
    pub location: &'static str,
    pub encrypted: &'static str,
}

pub static CLUES: [Clue; 6] = [
    Clue::new(1, "Cafeteria", "KILLER AVOIDS GROUPS", "NLOOHU DYRLGV JURXSV"),
    Clue::new(2, "classroom", "KILLER WATCHES OTHERS", "NLOOHU ZDWFKHV RWKHUV"),
    Clue::new(3, "office", "KILLER STAYS IN SHADOWS", "NLOOHU VWDBV LQ VKDGRZV"),
    Clue::new(4, "second floor library", "KILLER HUNTS ALONE", "NLOOHU KXQWV DORQH"),
    Clue::new(5, "conference room", "KILLER STRIKES QUIETLY", "NLOOHU VWULNHV TXLHWOB"),
    Clue::new(6, "art room", "KILLER MOVES UNSEEN", "NLOOHU PRYHV XQVHHQ"),
];

pub fn find(id: u32) -> Option<&'static Clue> {
    CLUES.iter().find(|c| c.id == id)
}

/// Plain letter -> cipher letter, the same table every match
pub fn cipher_key() -> BTreeMap<char, char> {
    (b'A'..=b'Z')
        .map(|plain| (plain as char, shift(plain as char)))
        .collect()
}

fn shift(c: char) -> char {
    if c.is_ascii_uppercase() {
        (((c as u8 - b'A' + CIPHER_SHIFT) % 26) + b'A') as char
    } else {
        c
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt(plain: &str) -> String {
        plain.chars().map(shift).collect()
    }

    #[test]
    fn ciphertexts_match_the_shared_key() {
        for clue in &CLUES {
            assert_eq!(encrypt(clue.solution()), clue.encrypted, "clue {}", clue.id);
        }
    }

    #[test]
    fn cipher_key_wraps_around_the_alphabet() {
        let key = cipher_key();
        assert_eq!(key.len(), 26);
        assert_eq!(key[&'A'], 'D');
        assert_eq!(key[&'W'], 'Z');
        assert_eq!(key[&'X'], 'A');
        assert_eq!(key[&'Z'], 'C');
    }

    #[test]
    fn submission_comparison_ignores_case_and_padding() {
        let clue = find(1).unwrap();
        assert!(clue.is_solved_by("KILLER AVOIDS GROUPS"));
        assert!(clue.is_solved_by("  killer avoids groups "));
        assert!(!clue.is_solved_by("WRONG ANSWER"));
        assert!(!clue.is_solved_by("KILLER AVOIDS GROUP"));
    }

    #[test]
    fn public_view_hides_the_solution() {
        let json = serde_json::to_value(find(2).unwrap().public_view()).unwrap();
        assert_eq!(json["encrypted"], "NLOOHU ZDWFKHV RWKHUV");
        assert!(json.get("solution").is_none());
        assert!(json.get("message").is_none());
    }

    #[test]
    fn unknown_clue_is_none() {
        assert!(find(0).is_none());
        assert!(find(7).is_none());
    }
}
