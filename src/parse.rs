//! Lightweight fragment parser
//!
//! Extracts imports, namespaces, type declarations, and members from
//! generated C#-family fragments. Line- and brace-based: enough structure
//! for symbol registration, repair transforms, and merge conflict detection,
//! without a full grammar. The real compiler sits behind the `Validator`
//! boundary.

use serde::{Deserialize, Serialize};

/// Kind of a declared type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDeclKind {
    Class,
    Record,
    Struct,
    Interface,
    Enum,
}

impl TypeDeclKind {
    fn keyword(word: &str) -> Option<Self> {
        match word {
            "class" => Some(Self::Class),
            "record" => Some(Self::Record),
            "struct" => Some(Self::Struct),
            "interface" => Some(Self::Interface),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }
}

/// A member inside a declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDecl {
    pub name: String,
    /// Whitespace-normalized declaration head (through the parameter list
    /// for methods, through the name for properties and enum variants)
    pub signature: String,
    /// Full member text, body included
    pub text: String,
    /// 0-based line span within the fragment, inclusive
    pub start_line: usize,
    pub end_line: usize,
}

/// A type declared in a fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    pub namespace: String,
    pub kind: TypeDeclKind,
    /// Base class and interfaces from the `:` clause, in order
    pub base_types: Vec<String>,
    pub is_sealed: bool,
    pub members: Vec<MemberDecl>,
    /// 0-based line span of the whole declaration, inclusive
    pub start_line: usize,
    pub end_line: usize,
}

impl TypeDecl {
    pub fn fully_qualified_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

/// Parsed view of one source fragment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Import targets, in order of appearance
    pub usings: Vec<String>,
    pub types: Vec<TypeDecl>,
}

/// Parse a source fragment into imports and type declarations
pub fn parse_fragment(source: &str) -> Fragment {
    let lines: Vec<&str> = source.lines().collect();
    let mut fragment = Fragment::default();

    // Namespace scopes as (name, depth at which the block opened)
    let mut namespace_stack: Vec<(String, i32)> = Vec::new();
    let mut depth: i32 = 0;
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        let trimmed = line.trim();

        if let Some(target) = parse_using(trimmed) {
            fragment.usings.push(target);
            idx += 1;
            continue;
        }

        if let Some(name) = parse_namespace(trimmed) {
            // Block-scoped `namespace X {` or file-scoped `namespace X;`
            if trimmed.ends_with(';') {
                namespace_stack.push((name, -1));
            } else {
                let open_depth = depth;
                depth += brace_delta(line);
                namespace_stack.push((name, open_depth));
                idx += 1;
                continue;
            }
            idx += 1;
            continue;
        }

        if let Some((kind, name, is_sealed, base_types)) = parse_type_header(trimmed) {
            let namespace = namespace_stack
                .iter()
                .map(|(n, _)| n.as_str())
                .collect::<Vec<_>>()
                .join(".");
            let (end, members) = scan_type_body(&lines, idx, kind);
            fragment.types.push(TypeDecl {
                name,
                namespace,
                kind,
                base_types,
                is_sealed,
                members,
                start_line: idx,
                end_line: end,
            });
            for covered in idx..=end {
                depth += brace_delta(lines[covered]);
            }
            idx = end + 1;
            continue;
        }

        depth += brace_delta(line);
        // Close namespace scopes whose block ended
        while let Some((_, open_depth)) = namespace_stack.last() {
            if *open_depth >= 0 && depth <= *open_depth {
                namespace_stack.pop();
            } else {
                break;
            }
        }
        idx += 1;
    }

    fragment
}

/// Net brace count of a line, ignoring braces inside string literals
fn brace_delta(line: &str) -> i32 {
    let mut delta = 0;
    let mut in_string = false;
    let mut prev = '\0';
    for c in line.chars() {
        match c {
            '"' if prev != '\\' => in_string = !in_string,
            '{' if !in_string => delta += 1,
            '}' if !in_string => delta -= 1,
            _ => {}
        }
        prev = c;
    }
    delta
}

fn parse_using(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix("using ")?;
    // Skip using-declarations/statements like `using var x = ...`
    if rest.contains('=') || rest.starts_with('(') || rest.starts_with("var ") {
        return None;
    }
    Some(rest.trim_end_matches(';').trim().to_string())
}

fn parse_namespace(trimmed: &str) -> Option<String> {
    let rest = trimmed.strip_prefix("namespace ")?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '.' || *c == '_')
        .collect();
    if name.is_empty() { None } else { Some(name) }
}

/// Recognize a type declaration header line
fn parse_type_header(trimmed: &str) -> Option<(TypeDeclKind, String, bool, Vec<String>)> {
    if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with('[') {
        return None;
    }
    // Split off the base clause before tokenizing
    let (head, base_clause) = match trimmed.split_once(':') {
        Some((h, b)) => (h, Some(b)),
        None => (trimmed, None),
    };

    let words: Vec<&str> = head.split_whitespace().collect();
    let mut kind = None;
    let mut kind_pos = 0;
    for (pos, word) in words.iter().enumerate() {
        if let Some(k) = TypeDeclKind::keyword(word) {
            kind = Some(k);
            kind_pos = pos;
            break;
        }
    }
    let kind = kind?;
    let raw_name = words.get(kind_pos + 1)?;
    // Strip generic parameters and stray braces from the name token
    let name: String = raw_name
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_') {
        return None;
    }

    let is_sealed = words[..kind_pos].contains(&"sealed");
    let base_types = base_clause
        .map(|clause| {
            clause
                .trim_end_matches('{')
                .split(',')
                .map(|part| part.split_whitespace().collect::<String>())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some((kind, name, is_sealed, base_types))
}

/// Find the end of a type block and collect its members
fn scan_type_body(lines: &[&str], start: usize, kind: TypeDeclKind) -> (usize, Vec<MemberDecl>) {
    // Whole declaration on the header line
    let header = lines[start];
    if brace_delta(header) == 0 && header.contains('{') && header.trim_end().ends_with('}') {
        let members = if kind == TypeDeclKind::Enum {
            inline_enum_members(header, start)
        } else {
            Vec::new()
        };
        return (start, members);
    }

    let mut depth = 0i32;
    let mut opened = false;
    let mut end = start;
    let mut body_depth_lines: Vec<(usize, i32)> = Vec::new();

    for (offset, line) in lines[start..].iter().enumerate() {
        let idx = start + offset;
        let before = depth;
        depth += brace_delta(line);
        if depth > 0 {
            opened = true;
        }
        body_depth_lines.push((idx, before));
        if opened && depth <= 0 {
            end = idx;
            break;
        }
        end = idx;
    }

    let members = if kind == TypeDeclKind::Enum {
        collect_enum_members(lines, start, end)
    } else {
        collect_members(lines, start, end, &body_depth_lines)
    };
    (end, members)
}

/// Members of a single-line enum declaration like `enum Color { Red, Green }`
fn inline_enum_members(header: &str, line_idx: usize) -> Vec<MemberDecl> {
    let Some(open) = header.find('{') else { return Vec::new() };
    let Some(close) = header.rfind('}') else { return Vec::new() };
    if close <= open {
        return Vec::new();
    }
    header[open + 1..close]
        .split(',')
        .filter_map(|part| {
            let name: String = part
                .trim()
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if name.is_empty() {
                None
            } else {
                Some(MemberDecl {
                    signature: name.clone(),
                    name,
                    text: part.trim().to_string(),
                    start_line: line_idx,
                    end_line: line_idx,
                })
            }
        })
        .collect()
}

fn collect_enum_members(lines: &[&str], start: usize, end: usize) -> Vec<MemberDecl> {
    let mut members = Vec::new();
    for idx in start + 1..end {
        let trimmed = lines[idx].trim().trim_end_matches(',');
        if trimmed.is_empty() || trimmed == "{" || trimmed == "}" || trimmed.starts_with("//") {
            continue;
        }
        let name: String = trimmed
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if name.is_empty() {
            continue;
        }
        members.push(MemberDecl {
            signature: name.clone(),
            name,
            text: lines[idx].to_string(),
            start_line: idx,
            end_line: idx,
        });
    }
    members
}

/// Collect method and property members at the type's immediate body depth
fn collect_members(lines: &[&str], start: usize, end: usize, depth_lines: &[(usize, i32)]) -> Vec<MemberDecl> {
    // Depth of lines directly inside the type body
    let body_depth = depth_lines
        .iter()
        .find(|(idx, _)| *idx > start && !lines[*idx].trim().is_empty() && lines[*idx].trim() != "{")
        .map(|(_, d)| *d)
        .unwrap_or(1);

    let mut members = Vec::new();
    let mut idx = start + 1;
    while idx < end {
        let depth_here = depth_lines
            .iter()
            .find(|(i, _)| *i == idx)
            .map(|(_, d)| *d)
            .unwrap_or(0);
        let trimmed = lines[idx].trim();
        if depth_here != body_depth || trimmed.is_empty() || trimmed.starts_with("//") || trimmed == "{" || trimmed == "}" {
            idx += 1;
            continue;
        }
        if let Some(name) = member_name(trimmed) {
            // Extend through the member's block, which may open on this line
            // or a following one
            let mut member_end = idx;
            let mut depth = brace_delta(lines[idx]);
            let mut opened = depth > 0;
            if opened || (!trimmed.ends_with(';') && !trimmed.ends_with('}')) {
                for j in idx + 1..end {
                    depth += brace_delta(lines[j]);
                    if depth > 0 {
                        opened = true;
                    }
                    member_end = j;
                    if opened && depth <= 0 {
                        break;
                    }
                    if !opened && lines[j].trim().ends_with(';') {
                        break;
                    }
                }
            }
            let text = lines[idx..=member_end].join("\n");
            members.push(MemberDecl {
                name,
                signature: normalize_signature(trimmed),
                text,
                start_line: idx,
                end_line: member_end,
            });
            idx = member_end + 1;
            continue;
        }
        idx += 1;
    }
    members
}

/// Member name from a declaration line: identifier before '(' for methods,
/// last identifier before '{'/'=' /';' for properties and fields
fn member_name(trimmed: &str) -> Option<String> {
    if trimmed.starts_with('[') {
        return None;
    }
    let head = trimmed
        .split(|c| c == '(' || c == '{' || c == '=' || c == ';')
        .next()
        .unwrap_or("");
    let name = head.split_whitespace().last()?.to_string();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    // A bare keyword is not a member
    if ["public", "private", "protected", "internal", "static", "else", "return"].contains(&name.as_str()) {
        return None;
    }
    Some(name)
}

/// Normalize a declaration head for signature comparison
fn normalize_signature(line: &str) -> String {
    let head = match line.find(')') {
        Some(idx) => &line[..=idx],
        None => line
            .split(|c| c == '{' || c == '=' || c == ';')
            .next()
            .unwrap_or(line),
    };
    head.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"using System;
using System.Collections.Generic;

namespace Shop.Models
{
    public enum Color
    {
        Red,
        Green = 5,
        Blue,
    }

    public class Order : IComparable
    {
        public string Id { get; set; }

        public int CompareTo(object other)
        {
            return 0;
        }
    }
}
"#;

    #[test]
    fn test_parse_usings() {
        let fragment = parse_fragment(SAMPLE);
        assert_eq!(fragment.usings, vec!["System", "System.Collections.Generic"]);
    }

    #[test]
    fn test_parse_types_with_namespace() {
        let fragment = parse_fragment(SAMPLE);
        assert_eq!(fragment.types.len(), 2);
        assert_eq!(fragment.types[0].fully_qualified_name(), "Shop.Models.Color");
        assert_eq!(fragment.types[0].kind, TypeDeclKind::Enum);
        assert_eq!(fragment.types[1].fully_qualified_name(), "Shop.Models.Order");
        assert_eq!(fragment.types[1].kind, TypeDeclKind::Class);
    }

    #[test]
    fn test_enum_members_in_order() {
        let fragment = parse_fragment(SAMPLE);
        let names: Vec<&str> = fragment.types[0].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Red", "Green", "Blue"]);
    }

    #[test]
    fn test_class_members_and_bases() {
        let fragment = parse_fragment(SAMPLE);
        let order = &fragment.types[1];
        assert_eq!(order.base_types, vec!["IComparable"]);
        let names: Vec<&str> = order.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "CompareTo"]);
    }

    #[test]
    fn test_method_signature_normalized() {
        let fragment = parse_fragment(SAMPLE);
        let compare = fragment.types[1].members.iter().find(|m| m.name == "CompareTo").unwrap();
        assert_eq!(compare.signature, "public int CompareTo(object other)");
    }

    #[test]
    fn test_file_scoped_namespace() {
        let source = "namespace Shop.Services;\n\npublic interface IOrderService\n{\n    void Place(Order order);\n}\n";
        let fragment = parse_fragment(source);
        assert_eq!(fragment.types.len(), 1);
        assert_eq!(fragment.types[0].fully_qualified_name(), "Shop.Services.IOrderService");
        assert_eq!(fragment.types[0].kind, TypeDeclKind::Interface);
    }

    #[test]
    fn test_sealed_detection() {
        let source = "public sealed class Clock\n{\n}\n";
        let fragment = parse_fragment(source);
        assert!(fragment.types[0].is_sealed);
    }

    #[test]
    fn test_multiple_base_types() {
        let source = "public class Handler : BaseHandler, IDisposable, IHandler\n{\n}\n";
        let fragment = parse_fragment(source);
        assert_eq!(fragment.types[0].base_types, vec!["BaseHandler", "IDisposable", "IHandler"]);
    }

    #[test]
    fn test_generic_type_name_stripped() {
        let source = "public interface IRepository<T> where T : class\n{\n    T Get(string id);\n}\n";
        let fragment = parse_fragment(source);
        assert_eq!(fragment.types[0].name, "IRepository");
    }

    #[test]
    fn test_record_declaration() {
        let source = "namespace A\n{\n    public record OrderDto\n    {\n        public string Id { get; init; }\n    }\n}\n";
        let fragment = parse_fragment(source);
        assert_eq!(fragment.types[0].kind, TypeDeclKind::Record);
        assert_eq!(fragment.types[0].members.len(), 1);
    }

    #[test]
    fn test_sequential_types_same_namespace() {
        let source = "namespace A\n{\n    public class X\n    {\n    }\n\n    public class Y\n    {\n    }\n}\n";
        let fragment = parse_fragment(source);
        assert_eq!(fragment.types.len(), 2);
        assert_eq!(fragment.types[1].fully_qualified_name(), "A.Y");
    }

    #[test]
    fn test_braces_in_strings_ignored() {
        assert_eq!(brace_delta(r#"var s = "{{{";"#), 0);
        assert_eq!(brace_delta("if (x) {"), 1);
    }

    #[test]
    fn test_commented_declaration_ignored() {
        let fragment = parse_fragment("// class Ghost does things\npublic class Real\n{\n}\n");
        assert_eq!(fragment.types.len(), 1);
        assert_eq!(fragment.types[0].name, "Real");
    }

    #[test]
    fn test_single_line_enum() {
        let fragment = parse_fragment("public enum Color { Red, Green, Blue }\npublic class After\n{\n}\n");
        assert_eq!(fragment.types.len(), 2);
        let names: Vec<&str> = fragment.types[0].members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Red", "Green", "Blue"]);
        assert_eq!(fragment.types[1].name, "After");
    }

    #[test]
    fn test_empty_fragment() {
        let fragment = parse_fragment("");
        assert!(fragment.usings.is_empty());
        assert!(fragment.types.is_empty());
    }

    #[test]
    fn test_member_spans_cover_bodies() {
        let fragment = parse_fragment(SAMPLE);
        let compare = fragment.types[1].members.iter().find(|m| m.name == "CompareTo").unwrap();
        assert!(compare.end_line > compare.start_line);
        assert!(compare.text.contains("return 0;"));
    }
}
