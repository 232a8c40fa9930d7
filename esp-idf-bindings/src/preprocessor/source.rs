//! Translation phases that run before directives are interpreted: line
//! splicing and comment removal.

/// A logical source line, after line continuations have been spliced and
/// comments replaced by whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Line {
    /// The 1-based number of the first physical line.
    pub number: usize,
    pub text: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    BlockComment,
    Str(char),
}

/// Lines joined by a block comment form one logical line, since the comment
/// is a single space.
pub(crate) fn logical_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut state = State::Code;

    let mut physical = source.lines().enumerate();
    while let Some((index, spliced)) = splice(&mut physical) {
        let number = index + 1;

        let mut text = strip_comments(&spliced, &mut state);
        while state == State::BlockComment {
            let Some((_, next)) = splice(&mut physical) else {
                break;
            };
            text.push_str(&strip_comments(&next, &mut state));
        }

        lines.push(Line {
            number,
            text: text.trim_end().to_string(),
        });
    }

    lines
}

/// The next physical line, with the lines it continues with `\` appended.
fn splice<'a>(physical: &mut impl Iterator<Item = (usize, &'a str)>) -> Option<(usize, String)> {
    let (index, first) = physical.next()?;

    let mut spliced = String::from(first);
    while spliced.ends_with('\\') {
        spliced.pop();
        match physical.next() {
            Some((_, next)) => spliced.push_str(next),
            None => break,
        }
    }

    Some((index, spliced))
}

fn strip_comments(line: &str, state: &mut State) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match *state {
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    *state = State::Code;
                    out.push(' ');
                }
            }
            State::Str(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote {
                    *state = State::Code;
                }
            }
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    *state = State::BlockComment;
                }
                '"' | '\'' => {
                    *state = State::Str(c);
                    out.push(c);
                }
                _ => out.push(c),
            },
        }
    }

    // String and character literals never span lines.
    if matches!(*state, State::Str(_)) {
        *state = State::Code;
    }

    out.trim_end().to_string()
}
