#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenizeError {
    UnterminatedQuote { quote: char },
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnterminatedQuote { quote } => {
                write!(f, "unterminated {quote} quote in command line")
            }
        }
    }
}

impl std::error::Error for TokenizeError {}

/// Splits a command line into words with shell-like quoting.
///
/// Outside quotes, whitespace separates words. `'` and `"` open a span that ends at the
/// next unescaped quote of the same kind; inside a span a backslash only escapes that quote
/// character or another backslash, otherwise it is kept verbatim. Adjacent fragments join
/// into one word, and a quoted empty string yields an empty word.
pub fn tokenize(input: &str) -> Result<Vec<String>, TokenizeError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if let Some(open) = quote {
            if ch == '\\' {
                match chars.peek() {
                    Some(&next) if next == open || next == '\\' => {
                        current.push(next);
                        chars.next();
                    }
                    _ => current.push('\\'),
                }
            } else if ch == open {
                quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }

        if ch.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
        } else if ch == '\'' || ch == '"' {
            quote = Some(ch);
            in_token = true;
        } else {
            current.push(ch);
            in_token = true;
        }
    }

    if let Some(quote) = quote {
        return Err(TokenizeError::UnterminatedQuote { quote });
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
