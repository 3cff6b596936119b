use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static TOKEN_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+:[A-Za-z0-9_-]+$").expect("valid token regex"));

/// Message shown when a token fails [`is_valid_token_format`].
pub const TOKEN_FORMAT_HINT: &str = "Invalid token format. Telegram bot tokens should be in format: \
                                     123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

/// Whether `token` looks like a Bot API token (`<digits>:<secret>`).
///
/// Surrounding whitespace is ignored. This says nothing about whether
/// Telegram accepts the token; see [`crate::TelegramProbe`] for that.
pub fn is_valid_token_format(token: &str) -> bool {
    TOKEN_FORMAT.is_match(token.trim())
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("123456789:ABCdefGHIjklMNOpqrsTUVwxyz", true)]
    #[case("1:a-b_c", true)]
    #[case("  42:token  ", true)]
    #[case("abc:def", false)]
    #[case("123456789", false)]
    #[case("123:", false)]
    #[case("123:has space", false)]
    #[case("", false)]
    fn token_format(#[case] token: &str, #[case] valid: bool) {
        assert_eq!(is_valid_token_format(token), valid);
    }
}
