use crate::error::ParseError;

/// A symbol split into the six trie levels.
///
/// Package fields written as `.` in the symbol text are stored empty. Local
/// symbols (`local <id>`) use the scheme `local` and keep their id as the
/// descriptor suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplodedSymbol {
    pub scheme: String,
    pub package_manager: String,
    pub package_name: String,
    pub package_version: String,
    pub descriptor_namespace: String,
    pub descriptor_suffix: String,
    pub fuzzy_descriptor_suffix: String,
}

/// Parses `<scheme> <manager> <name> <version> <descriptors>`.
///
/// A double space inside the first four fields is a literal space.
pub fn explode(symbol: &str) -> Result<ExplodedSymbol, ParseError> {
    if let Some(id) = symbol.strip_prefix("local ") {
        if id.is_empty() {
            return Err(ParseError::new(symbol, "empty local id"));
        }

        return Ok(ExplodedSymbol {
            scheme: "local".to_owned(),
            package_manager: String::new(),
            package_name: String::new(),
            package_version: String::new(),
            descriptor_namespace: String::new(),
            descriptor_suffix: id.to_owned(),
            fuzzy_descriptor_suffix: id.to_owned(),
        });
    }

    let mut rest = symbol;
    let scheme = take_field(symbol, &mut rest)?;
    if scheme.is_empty() || scheme == "." {
        return Err(ParseError::new(symbol, "empty scheme"));
    }

    let package_manager = package_field(take_field(symbol, &mut rest)?);
    let package_name = package_field(take_field(symbol, &mut rest)?);
    let package_version = package_field(take_field(symbol, &mut rest)?);

    let descriptors = parse_descriptors(symbol, rest)?;
    let Some((last, namespace)) = descriptors.split_last() else {
        return Err(ParseError::new(symbol, "missing descriptors"));
    };

    Ok(ExplodedSymbol {
        scheme,
        package_manager,
        package_name,
        package_version,
        descriptor_namespace: namespace.iter().map(|d| d.text.as_str()).collect(),
        descriptor_suffix: last.text.clone(),
        fuzzy_descriptor_suffix: last.fuzzy.clone(),
    })
}

fn package_field(field: String) -> String {
    if field == "." {
        String::new()
    } else {
        field
    }
}

fn take_field(symbol: &str, rest: &mut &str) -> Result<String, ParseError> {
    let mut field = String::new();
    let mut chars = rest.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != ' ' {
            field.push(c);
            continue;
        }

        if let Some((_, ' ')) = chars.peek() {
            chars.next();
            field.push(' ');
            continue;
        }

        *rest = &rest[i + 1..];
        return Ok(field);
    }

    Err(ParseError::new(symbol, "truncated symbol"))
}

struct Descriptor {
    text: String,
    fuzzy: String,
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '+' | '-' | '$')
}

fn parse_descriptors(symbol: &str, input: &str) -> Result<Vec<Descriptor>, ParseError> {
    let mut descriptors = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let start = pos;
        let tail = &input[pos..];

        if let Some(inner) = tail.strip_prefix('[') {
            let end = inner
                .find(']')
                .ok_or_else(|| ParseError::new(symbol, "unterminated type parameter"))?;
            pos += end + 2;
            let text = input[start..pos].to_owned();
            descriptors.push(Descriptor {
                fuzzy: text.clone(),
                text,
            });
            continue;
        }

        if let Some(inner) = tail.strip_prefix('(') {
            let end = inner
                .find(')')
                .ok_or_else(|| ParseError::new(symbol, "unterminated parameter"))?;
            pos += end + 2;
            let text = input[start..pos].to_owned();
            descriptors.push(Descriptor {
                fuzzy: text.clone(),
                text,
            });
            continue;
        }

        pos += name_len(symbol, tail)?;
        let name_end = pos;

        let suffix = input[pos..]
            .chars()
            .next()
            .ok_or_else(|| ParseError::new(symbol, "descriptor without suffix"))?;

        match suffix {
            '/' | '#' | '.' | ':' | '!' => {
                pos += 1;
                let text = input[start..pos].to_owned();
                descriptors.push(Descriptor {
                    fuzzy: text.clone(),
                    text,
                });
            }
            '(' => {
                let close = input[pos..]
                    .find(')')
                    .ok_or_else(|| ParseError::new(symbol, "unterminated disambiguator"))?;
                pos += close + 1;

                if !input[pos..].starts_with('.') {
                    return Err(ParseError::new(symbol, "method without trailing `.`"));
                }
                pos += 1;

                descriptors.push(Descriptor {
                    text: input[start..pos].to_owned(),
                    fuzzy: format!("{}().", &input[start..name_end]),
                });
            }
            _ => return Err(ParseError::new(symbol, "unknown descriptor suffix")),
        }
    }

    Ok(descriptors)
}

/// Byte length of the (possibly backtick-escaped) name at the head of `tail`.
fn name_len(symbol: &str, tail: &str) -> Result<usize, ParseError> {
    if let Some(inner) = tail.strip_prefix('`') {
        let mut chars = inner.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c != '`' {
                continue;
            }

            if let Some((_, '`')) = chars.peek() {
                chars.next();
                continue;
            }

            return Ok(i + 2);
        }

        return Err(ParseError::new(symbol, "unterminated escaped name"));
    }

    let len: usize = tail
        .chars()
        .take_while(|c| is_identifier_char(*c))
        .map(char::len_utf8)
        .sum();

    if len == 0 {
        return Err(ParseError::new(symbol, "empty descriptor name"));
    }

    Ok(len)
}
