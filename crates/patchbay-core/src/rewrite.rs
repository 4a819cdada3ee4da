//! Destination path rewriting
//!
//! A destination path may contain `%N` tokens (N ≥ 1). Token `%N` is replaced
//! by the N-th `/`-separated part of the source path; indices past the last
//! part fall through to the message arguments, rendered as strings. `%%N`
//! escapes to a literal `%N`.

use rosc::OscType;

use crate::osc::arg_to_string;

/// A `%N` token that indexed past both the path parts and the arguments.
/// Carries the offending 1-based index for the warning line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidIndex(pub usize);

/// Rewrite `src` through `template`.
///
/// An empty template passes the source path through unchanged. On an invalid
/// replacement index the whole rewrite fails and the packet is dropped.
pub fn rewrite(src: &str, template: &str, args: &[OscType]) -> Result<String, InvalidIndex> {
    if template.is_empty() {
        return Ok(src.to_owned());
    }

    let tmpl: Vec<char> = template.chars().collect();
    let len = tmpl.len();
    let mut out = String::with_capacity(template.len());
    let mut parts: Option<Vec<&str>> = None;
    let mut i = 0;

    while i < len {
        if tmpl[i] != '%' {
            out.push(tmpl[i]);
            i += 1;
            continue;
        }

        // %%N collapses to a literal %N
        if i + 2 < len && tmpl[i + 1] == '%' && tmpl[i + 2].is_ascii_digit() {
            out.push('%');
            i += 2;
            while i < len && tmpl[i].is_ascii_digit() {
                out.push(tmpl[i]);
                i += 1;
            }
            continue;
        }

        // %N substitution
        if i + 1 < len && tmpl[i + 1].is_ascii_digit() {
            let mut j = i + 1;
            let mut n: usize = 0;
            while j < len && tmpl[j].is_ascii_digit() {
                n = n * 10 + tmpl[j].to_digit(10).unwrap() as usize;
                j += 1;
            }

            let parts = parts.get_or_insert_with(|| {
                let p: Vec<&str> = src.split('/').filter(|s| !s.is_empty()).collect();
                if p.is_empty() {
                    vec![src]
                } else {
                    p
                }
            });

            if n == 0 {
                return Err(InvalidIndex(0));
            }
            let idx = n - 1;
            if idx < parts.len() {
                out.push_str(parts[idx]);
            } else {
                match args
                    .get(idx - parts.len())
                    .and_then(|arg| arg_to_string(arg))
                {
                    Some(s) => out.push_str(&s),
                    None => return Err(InvalidIndex(n)),
                }
            }
            i = j;
            continue;
        }

        out.push('%');
        i += 1;
    }

    Ok(out)
}

/// Split a rewritten path on the first unescaped `=`.
///
/// The left side is the OSC address, the right side becomes a literal string
/// argument, turning `/a/b/c` into `/x "b"` style remaps. `%=` collapses to
/// a literal `=` without splitting.
pub fn split_literal_arg(path: &str) -> (String, Option<String>) {
    let chars: Vec<char> = path.chars().collect();
    let mut out = String::with_capacity(path.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '%' && i + 1 < chars.len() && chars[i + 1] == '=' {
            out.push('=');
            i += 2;
        } else if chars[i] == '=' {
            let rest: String = chars[i + 1..].iter().collect();
            let (arg, _) = split_literal_arg(&rest);
            return (out, Some(arg));
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }

    (out, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_template_passes_through() {
        assert_eq!(rewrite("/a/b", "", &[]).unwrap(), "/a/b");
    }

    #[test]
    fn substitutes_path_parts() {
        assert_eq!(
            rewrite("/eos/out/event/cue/1/25/fire", "/cue/%6/start", &[]).unwrap(),
            "/cue/25/start"
        );
        assert_eq!(rewrite("/a/b/c", "/%1/%3", &[]).unwrap(), "/a/c");
    }

    #[test]
    fn falls_through_to_args() {
        let args = vec![OscType::Int(7), OscType::String("go".into())];
        // two path parts, so %3 is args[0] and %4 is args[1]
        assert_eq!(rewrite("/a/b", "/x/%3/%4", &args).unwrap(), "/x/7/go");
    }

    #[test]
    fn escape_is_not_substituted() {
        assert_eq!(rewrite("/x", "/%%1", &[]).unwrap(), "/%1");
        assert_eq!(rewrite("/a/b", "/%%2/%2", &[]).unwrap(), "/%2/b");
    }

    #[test]
    fn invalid_index_fails() {
        assert_eq!(rewrite("/x/y", "/%9", &[]), Err(InvalidIndex(9)));
        assert_eq!(
            rewrite("/x", "/%2", &[OscType::Nil]),
            Err(InvalidIndex(2))
        );
    }

    #[test]
    fn bare_percent_is_literal() {
        assert_eq!(rewrite("/a", "/volume%", &[]).unwrap(), "/volume%");
        assert_eq!(rewrite("/a", "/%x", &[]).unwrap(), "/%x");
    }

    #[test]
    fn pathless_source_is_single_part() {
        assert_eq!(rewrite("ping", "/got/%1", &[]).unwrap(), "/got/ping");
    }

    #[test]
    fn literal_arg_split() {
        assert_eq!(
            split_literal_arg("/eos/cue/fire=25"),
            ("/eos/cue/fire".to_owned(), Some("25".to_owned()))
        );
        assert_eq!(split_literal_arg("/plain"), ("/plain".to_owned(), None));
        assert_eq!(split_literal_arg("/a%=b"), ("/a=b".to_owned(), None));
    }
}
