use lazy_static::lazy_static;
use rand::{thread_rng, Rng};
use regex::Regex;

lazy_static! {
    static ref CODE_REGEX: Regex = Regex::new(r"^[A-Z0-9][A-Z0-9_-]*$").unwrap();
    static ref IBAN_REGEX: Regex = Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}$").unwrap();
}

// No 0/O or 1/I so codes survive being read aloud
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const GENERATED_CODE_LENGTH: usize = 8;

/// Codes are matched case-insensitively and stored upper-case
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn generate_code() -> String {
    let mut rng = thread_rng();
    (0..GENERATED_CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

pub struct AffiliateCodeValidator;

impl AffiliateCodeValidator {
    /// Validate an already normalised custom code
    pub fn validate(code: &str) -> Result<(), String> {
        if code.len() < 3 {
            return Err("Affiliate code must be at least 3 characters long".to_string());
        }

        if code.len() > 32 {
            return Err("Affiliate code must be no more than 32 characters long".to_string());
        }

        if !CODE_REGEX.is_match(code) {
            return Err("Affiliate code can only contain letters, numbers, hyphens, and underscores, and must start with a letter or number".to_string());
        }

        if code.contains("--") || code.contains("__") || code.contains("-_") || code.contains("_-")
        {
            return Err("Affiliate code cannot contain consecutive special characters".to_string());
        }

        if code.ends_with('-') || code.ends_with('_') {
            return Err("Affiliate code cannot end with a special character".to_string());
        }

        Ok(())
    }
}

pub fn normalize_iban(iban: &str) -> String {
    iban.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Shape and ISO 13616 mod-97 check of a normalised IBAN
pub fn validate_iban(iban: &str) -> Result<(), String> {
    if !IBAN_REGEX.is_match(iban) {
        return Err("IBAN format is invalid".to_string());
    }

    let rearranged = iban[4..].chars().chain(iban[..4].chars());
    let mut remainder: u32 = 0;
    for c in rearranged {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return Err("IBAN contains invalid characters".to_string()),
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }

    if remainder == 1 {
        Ok(())
    } else {
        Err("IBAN checksum is invalid".to_string())
    }
}
