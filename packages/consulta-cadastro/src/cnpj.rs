//! CNPJ (taxpayer identifier) normalization and check-digit validation.

use std::fmt;

use crate::error::ValidationError;

/// Number of digits in a CNPJ.
pub const CNPJ_LEN: usize = 14;

/// A normalized, checksum-valid CNPJ (14 digits, no punctuation).
///
/// The only way to obtain one is [`normalize`], so holding a `Cnpj` means the
/// value is safe to put in an outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cnpj(String);

impl Cnpj {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Format as `NN.NNN.NNN/NNNN-NN`.
    ///
    /// # Examples
    /// ```
    /// use consulta_cadastro::cnpj::normalize;
    ///
    /// let cnpj = normalize("11222333000181").unwrap();
    /// assert_eq!(cnpj.formatted(), "11.222.333/0001-81");
    /// ```
    #[must_use]
    pub fn formatted(&self) -> String {
        let d = &self.0;
        format!(
            "{}.{}.{}/{}-{}",
            &d[0..2],
            &d[2..5],
            &d[5..8],
            &d[8..12],
            &d[12..14]
        )
    }
}

impl fmt::Display for Cnpj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Cnpj {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip punctuation from a CNPJ and validate its check digits.
///
/// # Errors
/// * `MalformedLength` unless exactly 14 digits remain
/// * `AllDigitsIdentical` for values like `11111111111111`
/// * `ChecksumMismatch` if either check digit is wrong
///
/// # Examples
/// ```
/// use consulta_cadastro::cnpj::normalize;
///
/// let cnpj = normalize("11.222.333/0001-81").unwrap();
/// assert_eq!(cnpj.as_str(), "11222333000181");
/// assert!(normalize("11.222.333/0001-82").is_err());
/// ```
pub fn normalize(raw: &str) -> Result<Cnpj, ValidationError> {
    let digits: Vec<u8> = raw
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| d as u8)
        .collect();

    if digits.len() != CNPJ_LEN {
        return Err(ValidationError::MalformedLength {
            input: raw.to_string(),
            digits: digits.len(),
        });
    }

    if digits.iter().all(|d| *d == digits[0]) {
        return Err(ValidationError::AllDigitsIdentical(raw.to_string()));
    }

    let first = check_digit(&digits[..12], 5);
    let mut with_first = digits[..12].to_vec();
    with_first.push(first);
    let second = check_digit(&with_first, 6);

    if digits[12] != first || digits[13] != second {
        return Err(ValidationError::ChecksumMismatch {
            input: raw.to_string(),
            expected: format!("{first}{second}"),
        });
    }

    Ok(Cnpj(digits.iter().map(|d| char::from(b'0' + d)).collect()))
}

/// `true` if `raw` normalizes to a valid CNPJ.
#[must_use]
pub fn is_valid(raw: &str) -> bool {
    normalize(raw).is_ok()
}

/// Weighted mod-11 check digit. Weights count down from `first_weight` and
/// wrap from 2 back to 9.
fn check_digit(digits: &[u8], first_weight: u32) -> u8 {
    let mut weight = first_weight;
    let mut sum = 0u32;
    for d in digits {
        sum += u32::from(*d) * weight;
        weight = if weight == 2 { 9 } else { weight - 1 };
    }
    match sum % 11 {
        0 | 1 => 0,
        r => (11 - r) as u8,
    }
}

/// Strip punctuation from a state registration number (IE).
///
/// IE layouts differ per UF, so only the shape is checked here: at least one
/// digit and nothing but digits after removing `.`, `-`, `/` and spaces.
pub fn normalize_ie(raw: &str) -> Result<String, ValidationError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | '/' | ' '))
        .collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::MalformedRegistration(raw.to_string()));
    }
    Ok(cleaned)
}
