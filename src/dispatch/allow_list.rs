/// Fixed set of destinations allowed to receive SMS from this service.
/// A number is approved when it ends with an approved entry, with or without
/// the leading `+`.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    approved: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(numbers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let approved = numbers
            .into_iter()
            .map(Into::into)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.trim_start_matches('+').is_empty())
            .collect();
        Self { approved }
    }

    pub fn is_approved(&self, number: &str) -> bool {
        self.approved
            .iter()
            .any(|approved| matches_number(number, approved))
    }

    pub fn len(&self) -> usize {
        self.approved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.approved.is_empty()
    }
}

/// True when `number` ends with `reference`, with or without its leading `+`.
pub fn matches_number(number: &str, reference: &str) -> bool {
    let number = number.trim();
    let reference = reference.trim();
    let bare = reference.trim_start_matches('+');
    if number.is_empty() || bare.is_empty() {
        return false;
    }
    number.ends_with(reference) || number.ends_with(bare)
}

/// Keeps only the last four digits for logs.
pub fn mask_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    let tail: String = digits[digits.len().saturating_sub(4)..].iter().collect();
    format!("***{}", tail)
}
