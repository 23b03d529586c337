//! Admin password generator (SPEC_FULL.md §4.4, testable property 8):
//! 72 characters, at least one of each of lowercase/uppercase/digit/special,
//! never persisted past the VM create request.

use rand::seq::SliceRandom;
use rand::Rng;

const LENGTH: usize = 72;
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGIT: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()-_=+[]{}";

pub fn generate_admin_password() -> String {
    let mut rng = rand::thread_rng();
    let all: Vec<u8> = [LOWER, UPPER, DIGIT, SPECIAL].concat();

    let mut chars: Vec<u8> = Vec::with_capacity(LENGTH);
    // Guarantee at least one of each required class, then fill the rest
    // uniformly from the combined alphabet.
    chars.push(*LOWER.choose(&mut rng).unwrap());
    chars.push(*UPPER.choose(&mut rng).unwrap());
    chars.push(*DIGIT.choose(&mut rng).unwrap());
    chars.push(*SPECIAL.choose(&mut rng).unwrap());
    for _ in chars.len()..LENGTH {
        chars.push(*all.choose(&mut rng).unwrap());
    }
    chars.shuffle(&mut rng);

    String::from_utf8(chars).expect("password alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_satisfies_the_contract() {
        for _ in 0..50 {
            let password = generate_admin_password();
            assert_eq!(password.len(), LENGTH);
            assert!(password.bytes().any(|b| LOWER.contains(&b)));
            assert!(password.bytes().any(|b| UPPER.contains(&b)));
            assert!(password.bytes().any(|b| DIGIT.contains(&b)));
            assert!(password.bytes().any(|b| SPECIAL.contains(&b)));
            assert!(password.bytes().all(|b| !b.is_ascii_control()));
        }
    }
}
