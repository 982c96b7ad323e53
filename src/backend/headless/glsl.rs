//! Minimal GLSL front end for the headless backend.
//!
//! Real drivers report active uniforms after linking. Without a driver we run
//! a tiny preprocessor (`#define`, `#undef`, `#ifdef`, `#ifndef`,
//! `#if defined(..)`, `#else`, `#endif`, `#error`) and then scan the surviving
//! top-level `uniform` declarations.

use std::collections::HashSet;

use crate::backend::types::{ActiveUniform, UniformType};

/// Uniform interface of one shader stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlslInterface {
    pub uniforms: Vec<ActiveUniform>,
    pub blocks: Vec<String>,
    pub has_main: bool,
}

impl GlslInterface {
    /// Union of two stage interfaces, as the linker sees them.
    pub fn merge(mut self, other: GlslInterface) -> GlslInterface {
        for uniform in other.uniforms {
            if !self.uniforms.iter().any(|u| u.name == uniform.name) {
                self.uniforms.push(uniform);
            }
        }
        for block in other.blocks {
            if !self.blocks.contains(&block) {
                self.blocks.push(block);
            }
        }
        self.has_main &= other.has_main;
        self
    }
}

/// Run the preprocessor, returning the active source lines.
pub fn preprocess(source: &str) -> Result<String, String> {
    let mut lines = source.lines();
    let first = lines
        .by_ref()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| "empty shader source".to_string())?;
    if !first.starts_with("#version") {
        return Err(format!("0:1: '#version' must be the first directive, found '{first}'"));
    }

    let mut defines: HashSet<String> = HashSet::new();
    // Each entry: (this branch active, any branch of the group taken, parent active)
    let mut stack: Vec<(bool, bool, bool)> = Vec::new();
    let mut output = String::new();

    for (number, raw) in lines.enumerate() {
        let line = raw.trim();
        let active = stack.last().map(|s| s.0).unwrap_or(true);

        if let Some(directive) = line.strip_prefix('#') {
            let directive = directive.trim_start();
            let (keyword, rest) = directive
                .split_once(char::is_whitespace)
                .map(|(k, r)| (k, r.trim()))
                .unwrap_or((directive, ""));
            match keyword {
                "define" if active => {
                    if let Some(name) = rest.split_whitespace().next() {
                        defines.insert(name.to_string());
                    }
                }
                "undef" if active => {
                    defines.remove(rest);
                }
                "ifdef" | "ifndef" | "if" => {
                    let condition = match keyword {
                        "ifdef" => defines.contains(rest),
                        "ifndef" => !defines.contains(rest),
                        _ => evaluate_condition(rest, &defines),
                    };
                    let taken = active && condition;
                    stack.push((taken, taken, active));
                }
                "else" => {
                    let top = stack
                        .last_mut()
                        .ok_or_else(|| format!("0:{}: '#else' without '#if'", number + 2))?;
                    top.0 = top.2 && !top.1;
                    top.1 |= top.0;
                }
                "endif" => {
                    stack
                        .pop()
                        .ok_or_else(|| format!("0:{}: '#endif' without '#if'", number + 2))?;
                }
                "error" if active => {
                    return Err(format!("0:{}: '#error' : {rest}", number + 2));
                }
                _ => {}
            }
            continue;
        }

        if active {
            output.push_str(raw);
            output.push('\n');
        }
    }

    if !stack.is_empty() {
        return Err("unterminated conditional directive".to_string());
    }
    Ok(output)
}

/// `defined(A) || defined(B)` style conditions; anything else evaluates false.
fn evaluate_condition(condition: &str, defines: &HashSet<String>) -> bool {
    condition.split("||").any(|alternative| {
        alternative.split("&&").all(|term| {
            let term = term.trim();
            let (negated, term) = match term.strip_prefix('!') {
                Some(rest) => (true, rest.trim()),
                None => (false, term),
            };
            let name = term
                .strip_prefix("defined")
                .map(|rest| rest.trim().trim_start_matches('(').trim_end_matches(')').trim());
            match name {
                Some(name) => defines.contains(name) != negated,
                None => term == "1",
            }
        })
    })
}

/// Preprocess and extract the uniform interface of one stage.
pub fn reflect(source: &str) -> Result<GlslInterface, String> {
    let text = preprocess(source)?;
    let mut interface = GlslInterface::default();
    let mut in_block = false;

    for line in text.lines().map(str::trim) {
        if in_block {
            if line.starts_with('}') {
                in_block = false;
            }
            continue;
        }
        if line.contains("void main") {
            interface.has_main = true;
        }

        // Drop a leading layout qualifier: `layout(std140) uniform ...`
        let line = match line.strip_prefix("layout") {
            Some(rest) => rest.split_once(')').map(|(_, r)| r.trim()).unwrap_or(rest),
            None => line,
        };
        let Some(declaration) = line.strip_prefix("uniform ") else {
            continue;
        };

        let mut tokens = declaration
            .split(|c: char| c.is_whitespace() || c == ';')
            .filter(|t| !t.is_empty())
            .filter(|t| !matches!(*t, "highp" | "mediump" | "lowp"));
        let Some(first) = tokens.next() else {
            continue;
        };

        match UniformType::from_glsl(first) {
            Some(ty) => {
                let Some(name) = tokens.next() else {
                    continue;
                };
                let (name, size) = match name.split_once('[') {
                    Some((base, len)) => (base, len.trim_end_matches(']').parse().unwrap_or(1)),
                    None => (name, 1),
                };
                interface.uniforms.push(ActiveUniform {
                    name: name.to_string(),
                    ty,
                    size,
                });
            }
            None => {
                let block = first.trim_end_matches('{');
                interface.blocks.push(block.to_string());
                in_block = !declaration.contains('}');
            }
        }
    }

    Ok(interface)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "#version 300 es
#define USE_MAP
precision highp float;
layout(std140) uniform ubo_per_frame {
    mat4 view;
    mat4 projection;
};
uniform vec4 base_color;
#ifdef USE_MAP
uniform sampler2D albedo_map;
#else
uniform float fallback;
#endif
#ifdef MISSING
uniform float never;
#endif
uniform highp float weights[4];
void main() {}
";

    #[test]
    fn test_reflect_uniforms_and_blocks() {
        let interface = reflect(SOURCE).unwrap();
        let names: Vec<_> = interface.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["base_color", "albedo_map", "weights"]);
        assert_eq!(interface.uniforms[2].size, 4);
        assert_eq!(interface.uniforms[1].ty, UniformType::Sampler2D);
        assert_eq!(interface.blocks, vec!["ubo_per_frame".to_string()]);
        assert!(interface.has_main);
    }

    #[test]
    fn test_missing_version_is_an_error() {
        assert!(preprocess("void main() {}").is_err());
    }

    #[test]
    fn test_error_directive_only_when_active() {
        let inactive = "#version 300 es\n#ifdef NOPE\n#error broken\n#endif\nvoid main() {}\n";
        assert!(preprocess(inactive).is_ok());
        let active = "#version 300 es\n#define NOPE\n#ifdef NOPE\n#error broken\n#endif\n";
        assert!(preprocess(active).unwrap_err().contains("broken"));
    }

    #[test]
    fn test_defined_conditions() {
        let source = "#version 300 es\n#define B\n#if defined(A) || defined(B)\nuniform float x;\n#endif\nvoid main() {}\n";
        let interface = reflect(source).unwrap();
        assert_eq!(interface.uniforms.len(), 1);
    }
}
