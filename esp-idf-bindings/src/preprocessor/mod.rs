//! A host-side C preprocessor for the directive subset found in ESP-IDF
//! headers.
//!
//! Only directives are interpreted. Text lines of active groups are passed
//! through untouched and no header is ever opened: `#include` directives in
//! active groups are recorded, in order, as part of the [`Resolution`].

mod expr;
mod lexer;
mod macros;
mod source;

use core::fmt;

pub use self::macros::{Macro, Macros};

/// Errors raised while processing a header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An `#error` directive in an active group.
    #[error("line {line}: #error {message}")]
    Directive { line: usize, message: String },
    /// A malformed directive or controlling expression.
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    /// A conditional that is still open at the end of the input.
    #[error("line {line}: unterminated #{directive}")]
    Unterminated { line: usize, directive: String },
    /// `#elif`, `#else` or `#endif` without an open conditional.
    #[error("line {line}: #{directive} without #if")]
    Unmatched { line: usize, directive: String },
}

/// An `#include` directive of an active group.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Include {
    /// The header name, without quotes or angle brackets.
    pub path: String,
    /// `<...>` rather than `"..."`.
    pub system: bool,
    pub line: usize,
}

impl fmt::Display for Include {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.system {
            write!(f, "#include <{}>", self.path)
        } else {
            write!(f, "#include \"{}\"", self.path)
        }
    }
}

/// An element of the active part of a header.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Item {
    Include(Include),
    Define {
        name: String,
        definition: Macro,
        line: usize,
    },
    Undef {
        name: String,
        line: usize,
    },
    /// A non-directive line.
    Text { text: String, line: usize },
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Include(include) => include.fmt(f),
            Item::Define {
                name, definition, ..
            } => {
                write!(f, "#define {name}")?;

                if let Macro::Function {
                    params, variadic, ..
                } = definition
                {
                    let mut params = params.clone();
                    if *variadic {
                        params.push("...".to_string());
                    }
                    write!(f, "({})", params.join(", "))?;
                }

                match definition.body() {
                    "" => Ok(()),
                    body => write!(f, " {body}"),
                }
            }
            Item::Undef { name, .. } => write!(f, "#undef {name}"),
            Item::Text { text, .. } => f.write_str(text),
        }
    }
}

/// The outcome of processing a header.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Resolution {
    pub items: Vec<Item>,
    /// Messages of `#warning` directives in active groups.
    pub warnings: Vec<String>,
}

impl Resolution {
    pub fn includes(&self) -> impl Iterator<Item = &Include> {
        self.items.iter().filter_map(|item| match item {
            Item::Include(include) => Some(include),
            _ => None,
        })
    }

    pub fn includes_header(&self, path: &str) -> bool {
        self.includes().any(|include| include.path == path)
    }
}

struct Frame {
    directive: &'static str,
    line: usize,
    /// Whether the enclosing group is active.
    parent_active: bool,
    /// Whether one of the branches has been taken already.
    taken: bool,
    active: bool,
    seen_else: bool,
}

/// Evaluates preprocessor directives against a macro set.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    macros: Macros,
}

impl Preprocessor {
    pub fn new(macros: Macros) -> Self {
        Self { macros }
    }

    /// The macro set, including the definitions made by processed input.
    pub fn macros(&self) -> &Macros {
        &self.macros
    }

    pub fn into_macros(self) -> Macros {
        self.macros
    }

    pub fn process(&mut self, text: &str) -> Result<Resolution, Error> {
        let mut resolution = Resolution::default();
        let mut stack: Vec<Frame> = Vec::new();

        for line in source::logical_lines(text) {
            let number = line.number;
            let active = stack.last().map_or(true, |frame| frame.active);

            let Some(directive) = line.text.trim_start().strip_prefix('#') else {
                let text = line.text.trim();
                if active && !text.is_empty() {
                    resolution.items.push(Item::Text {
                        text: text.to_string(),
                        line: number,
                    });
                }
                continue;
            };

            let directive = directive.trim_start();
            let name_len = directive
                .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .unwrap_or(directive.len());
            let (name, rest) = directive.split_at(name_len);
            let rest = rest.trim();

            let syntax = |message: String| Error::Syntax {
                line: number,
                message,
            };

            match name {
                "if" | "ifdef" | "ifndef" => {
                    let taken = if active {
                        self.condition(name, rest).map_err(syntax)?
                    } else {
                        false
                    };

                    stack.push(Frame {
                        directive: match name {
                            "if" => "if",
                            "ifdef" => "ifdef",
                            _ => "ifndef",
                        },
                        line: number,
                        parent_active: active,
                        taken,
                        active: taken,
                        seen_else: false,
                    });
                }
                "elif" | "elifdef" | "elifndef" => {
                    let frame = stack.last_mut().ok_or_else(|| Error::Unmatched {
                        line: number,
                        directive: name.to_string(),
                    })?;

                    if frame.seen_else {
                        return Err(syntax(format!("#{name} after #else")));
                    }

                    if frame.parent_active && !frame.taken {
                        let condition = match name {
                            "elif" => "if",
                            "elifdef" => "ifdef",
                            _ => "ifndef",
                        };
                        frame.active = self.condition(condition, rest).map_err(syntax)?;
                        frame.taken = frame.active;
                    } else {
                        frame.active = false;
                    }
                }
                "else" => {
                    let frame = stack.last_mut().ok_or_else(|| Error::Unmatched {
                        line: number,
                        directive: name.to_string(),
                    })?;

                    if frame.seen_else {
                        return Err(syntax("#else after #else".to_string()));
                    }

                    frame.seen_else = true;
                    frame.active = frame.parent_active && !frame.taken;
                    frame.taken = true;
                }
                "endif" => {
                    stack.pop().ok_or_else(|| Error::Unmatched {
                        line: number,
                        directive: name.to_string(),
                    })?;
                }
                // Everything else in a skipped group is ignored, unknown
                // directives included.
                _ if !active => {}
                "" => {}
                "include" | "include_next" => {
                    let include = self.include(rest, number).map_err(syntax)?;
                    resolution.items.push(Item::Include(include));
                }
                "define" => {
                    let (macro_name, definition) =
                        Macro::parse_definition(rest).map_err(syntax)?;

                    self.macros.define(macro_name.clone(), definition.clone());
                    resolution.items.push(Item::Define {
                        name: macro_name,
                        definition,
                        line: number,
                    });
                }
                "undef" => {
                    let macro_name = rest
                        .split_whitespace()
                        .next()
                        .ok_or_else(|| syntax("#undef without a macro name".to_string()))?;

                    self.macros.undef(macro_name);
                    resolution.items.push(Item::Undef {
                        name: macro_name.to_string(),
                        line: number,
                    });
                }
                "error" => {
                    return Err(Error::Directive {
                        line: number,
                        message: rest.to_string(),
                    });
                }
                "warning" => {
                    log::warn!("line {number}: #warning {rest}");
                    resolution.warnings.push(rest.to_string());
                }
                "pragma" | "line" | "ident" => {}
                other => {
                    return Err(syntax(format!("unknown directive #{other}")));
                }
            }
        }

        if let Some(frame) = stack.pop() {
            return Err(Error::Unterminated {
                line: frame.line,
                directive: frame.directive.to_string(),
            });
        }

        Ok(resolution)
    }

    fn condition(&self, directive: &str, rest: &str) -> Result<bool, String> {
        match directive {
            "if" => Ok(expr::evaluate(rest, &self.macros)? != 0),
            _ => {
                let mut words = rest.split_whitespace();
                let (Some(name), None) = (words.next(), words.next()) else {
                    return Err(format!("#{directive} expects a single macro name"));
                };

                Ok(self.macros.is_defined(name) == (directive == "ifdef"))
            }
        }
    }

    fn include(&self, rest: &str, line: usize) -> Result<Include, String> {
        if let Some(path) = delimited(rest, '"', '"') {
            return Ok(Include {
                path: path.to_string(),
                system: false,
                line,
            });
        }

        if let Some(path) = delimited(rest, '<', '>') {
            return Ok(Include {
                path: path.to_string(),
                system: true,
                line,
            });
        }

        // A computed include: expand, then try again.
        let tokens = lexer::tokenize(rest)?;
        let expanded = expr::expand(&tokens, &self.macros, &mut Vec::new(), false)?;
        let text = match expanded.as_slice() {
            [lexer::Token::Str(s)] => s.clone(),
            tokens if tokens.first().is_some_and(|t| t.is_punct("<")) => {
                tokens.iter().map(ToString::to_string).collect()
            }
            _ => return Err(format!("#include expects \"FILENAME\" or <FILENAME>, found `{rest}`")),
        };

        if text == rest {
            return Err(format!("#include expects \"FILENAME\" or <FILENAME>, found `{rest}`"));
        }

        self.include(&text, line)
    }
}

fn delimited(text: &str, open: char, close: char) -> Option<&str> {
    let inner = text.strip_prefix(open)?;
    let end = inner.find(close)?;

    inner[end + 1..].trim().is_empty().then(|| &inner[..end])
}

/// Processes `text` on top of `predefined` and returns every macro defined
/// afterwards.
pub fn collect_defines(text: &str, predefined: &Macros) -> Result<Macros, Error> {
    let mut preprocessor = Preprocessor::new(predefined.clone());
    preprocessor.process(text)?;

    Ok(preprocessor.into_macros())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn includes(text: &str, macros: &[(&str, &str)]) -> Vec<String> {
        let mut preprocessor = Preprocessor::new(macros.iter().copied().collect());

        preprocessor
            .process(text)
            .unwrap()
            .includes()
            .map(|include| include.path.clone())
            .collect()
    }

    #[test]
    fn picks_the_first_true_branch() {
        let header = r#"
#if ESP_IDF_VERSION_MAJOR == 4
#include "v4.h"
#elif ESP_IDF_VERSION_MAJOR == 5
#include "v5.h"
#elif ESP_IDF_VERSION_MAJOR >= 5
#include "never.h"
#else
#include "other.h"
#endif
"#;

        assert_eq!(includes(header, &[("ESP_IDF_VERSION_MAJOR", "4")]), ["v4.h"]);
        assert_eq!(includes(header, &[("ESP_IDF_VERSION_MAJOR", "5")]), ["v5.h"]);
        assert_eq!(includes(header, &[("ESP_IDF_VERSION_MAJOR", "6")]), ["never.h"]);
        assert_eq!(includes(header, &[]), ["other.h"]);
    }

    #[test]
    fn nested_groups_inside_skipped_groups_stay_skipped() {
        let header = r#"
#ifdef CONFIG_BT_ENABLED
#ifndef CONFIG_BT_NIMBLE_ENABLED
#include "bluedroid.h"
#else
#include "nimble.h"
#endif
#endif
#include <always.h>
"#;

        assert_eq!(includes(header, &[]), ["always.h"]);
        assert_eq!(
            includes(header, &[("CONFIG_BT_ENABLED", "1")]),
            ["bluedroid.h", "always.h"]
        );
        assert_eq!(
            includes(
                header,
                &[("CONFIG_BT_ENABLED", "1"), ("CONFIG_BT_NIMBLE_ENABLED", "1")]
            ),
            ["nimble.h", "always.h"]
        );
    }

    #[test]
    fn skipped_groups_are_not_evaluated() {
        let header = "#if 0\n#if 1 / 0\n#error nope\n#bogus\n#endif\n#endif\n";

        assert_eq!(includes(header, &[]), Vec::<String>::new());
    }

    #[test]
    fn defines_and_undefs_are_recorded_in_order() {
        let header = r#"
#define extra_flags mcpwm_drv_extra_flags // Rename
#include "driver/mcpwm_prelude.h"
#undef extra_flags
"#;

        let resolution = Preprocessor::default().process(header).unwrap();

        assert_eq!(
            resolution
                .items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            [
                "#define extra_flags mcpwm_drv_extra_flags",
                "#include \"driver/mcpwm_prelude.h\"",
                "#undef extra_flags",
            ]
        );
    }

    #[test]
    fn definitions_affect_later_conditions() {
        let header = "#define FEATURE 1\n#if FEATURE\n#include \"a.h\"\n#endif\n#undef FEATURE\n#ifdef FEATURE\n#include \"b.h\"\n#endif\n";

        assert_eq!(includes(header, &[]), ["a.h"]);
    }

    #[test]
    fn error_directive_aborts() {
        let header = "#if V < 2\n#error Only versions >= 2 are supported\n#endif\n#include \"x.h\"\n";

        assert_eq!(
            Preprocessor::new([("V", "1")].into_iter().collect()).process(header),
            Err(Error::Directive {
                line: 2,
                message: "Only versions >= 2 are supported".to_string(),
            })
        );
        assert_eq!(includes(header, &[("V", "2")]), ["x.h"]);
    }

    #[test]
    fn warnings_are_collected() {
        let resolution = Preprocessor::default()
            .process("#warning deprecated header\n#pragma once\n")
            .unwrap();

        assert_eq!(resolution.warnings, ["deprecated header"]);
        assert!(resolution.items.is_empty());
    }

    #[test]
    fn unbalanced_conditionals() {
        assert_eq!(
            Preprocessor::default().process("#if 1\n#include \"a.h\"\n"),
            Err(Error::Unterminated {
                line: 1,
                directive: "if".to_string(),
            })
        );
        assert_eq!(
            Preprocessor::default().process("#endif\n"),
            Err(Error::Unmatched {
                line: 1,
                directive: "endif".to_string(),
            })
        );
        assert!(matches!(
            Preprocessor::default().process("#if 1\n#else\n#elif 1\n#endif\n"),
            Err(Error::Syntax { line: 3, .. })
        ));
    }

    #[test]
    fn malformed_directives() {
        assert!(matches!(
            Preprocessor::default().process("#if 1 +\n#endif\n"),
            Err(Error::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            Preprocessor::default().process("#include esp.h\n"),
            Err(Error::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            Preprocessor::default().process("#frobnicate\n"),
            Err(Error::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn computed_includes() {
        let header = "#define HEADER \"esp_wifi.h\"\n#include HEADER\n";

        assert_eq!(includes(header, &[]), ["esp_wifi.h"]);
    }

    #[test]
    fn collects_defines() {
        let defines = collect_defines(
            "#ifndef SOC_CAPS_H\n#define SOC_CAPS_H\n#define SOC_DAC_SUPPORTED 1\n#if SOC_DAC_SUPPORTED\n#define SOC_DAC_CHAN_NUM (2)\n#endif\n#endif\n",
            &Macros::new(),
        )
        .unwrap();

        assert_eq!(defines.value_of("SOC_DAC_SUPPORTED"), Some("1"));
        assert_eq!(defines.value_of("SOC_DAC_CHAN_NUM"), Some("(2)"));
    }

    #[test]
    fn renders_function_like_defines() {
        let resolution = Preprocessor::default()
            .process("#define VAL(a, b) ((a) << 8 | (b))\n#define LOG(fmt, ...) printf(fmt, __VA_ARGS__)\n#define EMPTY\n")
            .unwrap();

        assert_eq!(
            resolution
                .items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            [
                "#define VAL(a, b) ((a) << 8 | (b))",
                "#define LOG(fmt, ...) printf(fmt, __VA_ARGS__)",
                "#define EMPTY",
            ]
        );
    }

    #[test]
    fn unsigned_conditions() {
        assert_eq!(
            includes("#if 0xFFFFFFFFFFFFFFFF > 0\n#include \"a.h\"\n#endif\n", &[]),
            ["a.h"]
        );
        assert_eq!(
            includes("#if -1 > 0u\n#include \"a.h\"\n#else\n#include \"b.h\"\n#endif\n", &[]),
            ["a.h"]
        );
    }

    #[test]
    fn comments_spanning_lines_belong_to_the_directive() {
        assert!(includes("#if 1 /* spans\n lines */ && 0\n#include \"a.h\"\n#endif\n", &[]).is_empty());
        assert_eq!(
            includes("/* a\n b */ #include \"a.h\"\n#include \"b.h\" /* c\n d */\n", &[]),
            ["a.h", "b.h"]
        );
    }
}
