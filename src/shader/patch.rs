//! Source patching that turns user GLSL into a Vulkan-style GLSL 450 fragment
//! shader the naga frontend accepts.
//!
//! User code keeps its line numbers: the header is inserted right after the
//! `#version` line (or at the top), removed declarations become blank lines,
//! and the entry wrapper is appended at the end.

use super::uniforms::{channel_index, is_builtin, UniformKind, UniformValue};

/// Prefix of every canvas-owned block member and helper.
pub(crate) const MEMBER_PREFIX: &str = "canvas_";

/// Built-in block members as `(type, name, array suffix)`.
const BUILTIN_MEMBERS: &[(&str, &str, &str)] = &[
    ("vec3", "iResolution", ""),
    ("float", "iTime", ""),
    ("float", "iTimeDelta", ""),
    ("float", "iFrameRate", ""),
    ("int", "iFrame", ""),
    ("vec4", "iMouse", ""),
    ("vec4", "iDate", ""),
    ("float", "iSampleRate", ""),
    ("vec4", "iChannelTime", ""),
    ("vec3", "iChannelResolution", "[4]"),
];

/// A loose `uniform` declaration folded into the canvas block.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclaredUniform {
    pub name: String,
    pub kind: UniformKind,
    pub default: Option<UniformValue>,
}

/// Patched shader text plus what is needed to map diagnostics back.
#[derive(Debug, Clone)]
pub struct PatchedSource {
    pub text: String,
    pub uniforms: Vec<DeclaredUniform>,
    user_lines: u32,
    insert_after: u32,
    inserted: u32,
}

impl PatchedSource {
    /// Maps a 1-based line of the patched text to the user's source.
    pub fn user_line(&self, patched_line: u32) -> u32 {
        let line = if patched_line <= self.insert_after {
            patched_line
        } else if patched_line <= self.insert_after + self.inserted {
            self.insert_after.max(1)
        } else {
            patched_line - self.inserted
        };
        line.clamp(1, self.user_lines)
    }
}

struct UniformLine {
    ty: String,
    names: Vec<(String, Option<String>)>,
}

/// Patches `source`. With `flip_frag_coord` the shader sees a bottom-left
/// `gl_FragCoord` on targets whose framebuffer origin is top-left.
pub fn patch(source: &str, flip_frag_coord: bool) -> PatchedSource {
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let user_lines = lines.len().max(1) as u32;

    let version_line = lines
        .iter()
        .position(|l| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with("//")
        })
        .filter(|&i| lines[i].trim_start().starts_with("#version"));

    let mut uniforms: Vec<DeclaredUniform> = Vec::new();
    let mut has_user_output = false;
    for line in lines.iter_mut() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#extension") || trimmed.starts_with("precision ") {
            line.clear();
            continue;
        }
        if let Some(decl) = parse_uniform_line(line) {
            if fold_uniforms(&decl, &mut uniforms) {
                line.clear();
            }
            continue;
        }
        if trimmed.starts_with("out ") && trimmed.contains("vec4") {
            let indent = line.len() - trimmed.len();
            line.insert_str(indent, "layout(location = 0) ");
            has_user_output = true;
        } else if trimmed.starts_with("layout") && trimmed.contains(" out ") {
            has_user_output = true;
        }
    }

    let uses_frag_color = lines.iter().any(|l| l.contains("gl_FragColor"));
    if uses_frag_color {
        for line in lines.iter_mut() {
            if line.contains("gl_FragColor") {
                *line = line.replace("gl_FragColor", "canvas_FragColor");
            }
        }
    }

    let user_main = find_main(&lines);
    let wrap_main_image = user_main.is_none() && lines.iter().any(|l| l.contains("mainImage"));
    let uses_frag_coord = lines.iter().any(|l| l.contains("gl_FragCoord"));
    let flip = flip_frag_coord && (uses_frag_coord || wrap_main_image);

    if flip {
        if let Some((row, col)) = user_main {
            lines[row].replace_range(col..col + 4, "canvas_user_main");
        }
        for line in lines.iter_mut() {
            if line.contains("gl_FragCoord") {
                *line = line.replace("gl_FragCoord", "canvas_FragCoord");
            }
        }
    }

    let declare_output = !has_user_output || uses_frag_color;
    let header = build_header(&uniforms, declare_output, flip);
    let footer = build_footer(flip, wrap_main_image);

    let mut text = String::with_capacity(source.len() + 2048);
    let (insert_after, inserted) = match version_line {
        Some(v) => {
            for line in &lines[..v] {
                text.push_str(line);
                text.push('\n');
            }
            text.push_str("#version 450\n");
            (v as u32 + 1, header.len() as u32)
        }
        None => {
            text.push_str("#version 450\n");
            (0, header.len() as u32 + 1)
        }
    };
    for line in &header {
        text.push_str(line);
        text.push('\n');
    }
    let body_start = version_line.map_or(0, |v| v + 1);
    for line in &lines[body_start..] {
        text.push_str(line);
        text.push('\n');
    }
    for line in &footer {
        text.push_str(line);
        text.push('\n');
    }

    PatchedSource {
        text,
        uniforms,
        user_lines,
        insert_after,
        inserted,
    }
}

/// Returns true when every name on the line was consumed.
fn fold_uniforms(decl: &UniformLine, uniforms: &mut Vec<DeclaredUniform>) -> bool {
    let kind = UniformKind::from_glsl(&decl.ty);
    let mut consumed = true;
    for (name, init) in &decl.names {
        if is_builtin_member(name) || channel_index(name).is_some() {
            continue;
        }
        let Some(kind) = kind else {
            consumed = false;
            continue;
        };
        if uniforms.iter().any(|u| &u.name == name) {
            continue;
        }
        uniforms.push(DeclaredUniform {
            name: name.clone(),
            kind,
            default: init.as_deref().and_then(|text| UniformValue::parse_glsl(kind, text)),
        });
    }
    consumed
}

fn is_builtin_member(name: &str) -> bool {
    BUILTIN_MEMBERS.iter().any(|(_, n, _)| *n == name)
}

fn build_header(uniforms: &[DeclaredUniform], declare_output: bool, flip: bool) -> Vec<String> {
    let mut header = Vec::new();
    header.push("layout(std140, set = 0, binding = 0) uniform CanvasParams {".to_string());
    for (ty, name, suffix) in BUILTIN_MEMBERS {
        header.push(format!("    {} {}{}{};", ty, MEMBER_PREFIX, name, suffix));
    }
    for u in uniforms {
        header.push(format!("    {} {}{};", u.kind.name(), MEMBER_PREFIX, u.name));
    }
    header.push("} canvas;".to_string());
    for (_, name, _) in BUILTIN_MEMBERS {
        header.push(format!("#define {} canvas.{}{}", name, MEMBER_PREFIX, name));
    }
    for u in uniforms {
        // Aliases such as `time` are declared by the user but filled by the canvas.
        header.push(format!("#define {} canvas.{}{}", u.name, MEMBER_PREFIX, u.name));
    }
    for channel in 0..4 {
        header.push(format!(
            "layout(set = 1, binding = {}) uniform texture2D canvas_channel{}_texture;",
            channel * 2,
            channel
        ));
        header.push(format!(
            "layout(set = 1, binding = {}) uniform sampler canvas_channel{}_sampler;",
            channel * 2 + 1,
            channel
        ));
        header.push(format!(
            "#define iChannel{c} sampler2D(canvas_channel{c}_texture, canvas_channel{c}_sampler)",
            c = channel
        ));
    }
    if declare_output {
        header.push("layout(location = 0) out vec4 canvas_FragColor;".to_string());
    }
    if flip {
        header.push("vec4 canvas_FragCoord;".to_string());
    }
    header
}

fn build_footer(flip: bool, wrap_main_image: bool) -> Vec<String> {
    if !flip && !wrap_main_image {
        return Vec::new();
    }
    let mut footer = Vec::new();
    footer.push("void main() {".to_string());
    if flip {
        footer.push(
            "    canvas_FragCoord = vec4(gl_FragCoord.x, iResolution.y - gl_FragCoord.y, gl_FragCoord.z, gl_FragCoord.w);"
                .to_string(),
        );
    }
    if wrap_main_image {
        let coord = if flip { "canvas_FragCoord" } else { "gl_FragCoord" };
        footer.push("    vec4 canvas_color = vec4(0.0, 0.0, 0.0, 1.0);".to_string());
        footer.push(format!("    mainImage(canvas_color, {}.xy);", coord));
        footer.push("    canvas_FragColor = vec4(canvas_color.rgb, 1.0);".to_string());
    } else {
        footer.push("    canvas_user_main();".to_string());
    }
    footer.push("}".to_string());
    footer
}

/// Parses `uniform <type> a [= init], b;` lines. Block declarations and
/// array uniforms are left alone.
fn parse_uniform_line(line: &str) -> Option<UniformLine> {
    let code = line.split("//").next()?.trim();
    let rest = code.strip_prefix("uniform")?;
    if !rest.starts_with(char::is_whitespace) || rest.contains('{') {
        return None;
    }
    let rest = rest.trim().strip_suffix(';')?.trim();

    let mut remainder = rest;
    let ty = loop {
        let (word, tail) = remainder.split_once(char::is_whitespace)?;
        remainder = tail.trim_start();
        if !matches!(word, "lowp" | "mediump" | "highp") {
            break word.to_string();
        }
    };

    let mut names = Vec::new();
    for item in split_top_level(remainder) {
        let (name, init) = match item.split_once('=') {
            Some((n, i)) => (n.trim(), Some(i.trim().to_string())),
            None => (item.trim(), None),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return None;
        }
        names.push((name.to_string(), init));
    }
    if names.is_empty() {
        return None;
    }
    Some(UniformLine { ty, names })
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn is_ident(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Finds `void main(` and returns the row and byte column of `main`.
fn find_main(lines: &[String]) -> Option<(usize, usize)> {
    for (row, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("//") {
            continue;
        }
        let mut search = 0;
        while let Some(found) = line[search..].find("main") {
            let col = search + found;
            search = col + 4;
            let before = &line[..col];
            let after = &line[col + 4..];
            if after.chars().next().is_some_and(is_ident) {
                continue;
            }
            if !after.trim_start().starts_with('(') {
                continue;
            }
            let before = before.trim_end();
            let Some(prefix) = before.strip_suffix("void") else {
                continue;
            };
            if before.len() == col || prefix.chars().last().is_some_and(is_ident) {
                continue;
            }
            return Some((row, col));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserts_version_and_header() {
        let patched = patch("void main(){gl_FragColor=vec4(1,0,0,1);}", false);
        assert!(patched.text.starts_with("#version 450\n"));
        assert!(patched.text.contains("uniform CanvasParams"));
        assert!(patched.text.contains("canvas_FragColor=vec4(1,0,0,1)"));
        assert!(patched.text.contains("layout(location = 0) out vec4 canvas_FragColor;"));
        assert!(!patched.text.contains("canvas_user_main"));
    }

    #[test]
    fn test_rewrites_existing_version_line() {
        let src = "// header comment\n#version 330 core\nvoid main(){}\n";
        let patched = patch(src, false);
        assert!(patched.text.starts_with("// header comment\n#version 450\n"));
        assert!(!patched.text.contains("#version 330"));
        // line 3 of the user source sits after the header
        let body_line = patched
            .text
            .lines()
            .position(|l| l == "void main(){}")
            .unwrap() as u32
            + 1;
        assert_eq!(patched.user_line(body_line), 3);
        assert_eq!(patched.user_line(2), 2);
        assert_eq!(patched.user_line(3), 2);
    }

    #[test]
    fn test_user_lines_map_back_without_version() {
        let src = "float f(){ return 1.0; }\nvoid main(){}\n";
        let patched = patch(src, false);
        let row = patched.text.lines().position(|l| l == "void main(){}").unwrap() as u32 + 1;
        assert_eq!(patched.user_line(row), 2);
        assert_eq!(patched.user_line(10_000), 2);
    }

    #[test]
    fn test_folds_loose_uniforms_with_defaults() {
        let src = "uniform float speed = 2.0;\nuniform highp vec3 tint = vec3(1.0, 0.5, 0.0);\nuniform float time;\nvoid main(){}\n";
        let patched = patch(src, false);
        assert_eq!(patched.uniforms.len(), 3);
        assert_eq!(patched.uniforms[0].name, "speed");
        assert_eq!(patched.uniforms[0].default, Some(UniformValue::Float(2.0)));
        assert_eq!(patched.uniforms[1].default, Some(UniformValue::Vec3([1.0, 0.5, 0.0])));
        assert_eq!(patched.uniforms[2].default, None);
        assert!(patched.text.contains("    float canvas_speed;"));
        assert!(patched.text.contains("#define speed canvas.canvas_speed"));
        assert!(!patched.text.contains("uniform float speed"));
    }

    #[test]
    fn test_function_call_initializer_has_no_default() {
        let patched = patch("uniform float gain = sin(1.0);\nvoid main(){}\n", false);
        assert_eq!(patched.uniforms.len(), 1);
        assert_eq!(patched.uniforms[0].name, "gain");
        assert_eq!(patched.uniforms[0].default, None);
    }

    #[test]
    fn test_drops_builtin_redeclarations() {
        let src = "uniform vec3 iResolution;\nuniform float iTime;\nuniform sampler2D iChannel0;\nvoid main(){}\n";
        let patched = patch(src, false);
        assert!(patched.uniforms.is_empty());
        assert!(!patched.text.contains("uniform sampler2D iChannel0"));
        assert_eq!(patched.text.matches("canvas_iTime;").count(), 1);
    }

    #[test]
    fn test_keeps_unsupported_uniform_lines() {
        let src = "uniform mat3 basis;\nvoid main(){}\n";
        let patched = patch(src, false);
        assert!(patched.uniforms.is_empty());
        assert!(patched.text.contains("uniform mat3 basis;"));
    }

    #[test]
    fn test_wraps_main_image() {
        let src = "void mainImage(out vec4 fragColor, in vec2 fragCoord) { fragColor = vec4(1.0); }\n";
        let patched = patch(src, false);
        assert!(patched.text.contains("mainImage(canvas_color, gl_FragCoord.xy);"));
        assert!(patched.text.contains("canvas_FragColor = vec4(canvas_color.rgb, 1.0);"));
    }

    #[test]
    fn test_flip_renames_user_main_when_frag_coord_is_used() {
        let src = "void main() { gl_FragColor = vec4(gl_FragCoord.xy / iResolution.xy, 0.0, 1.0); }\n";
        let patched = patch(src, true);
        assert!(patched.text.contains("void canvas_user_main()"));
        assert!(patched.text.contains("vec4(canvas_FragCoord.xy / iResolution.xy, 0.0, 1.0)"));
        assert!(patched.text.contains("iResolution.y - gl_FragCoord.y"));
        assert!(patched.text.contains("canvas_user_main();"));
    }

    #[test]
    fn test_bare_outputs_get_a_location() {
        let src = "out vec4 color;\nvoid main(){ color = vec4(1.0); }\n";
        let patched = patch(src, false);
        assert!(patched.text.contains("layout(location = 0) out vec4 color;"));
        assert!(!patched.text.contains("out vec4 canvas_FragColor"));
    }

    #[test]
    fn test_find_main_ignores_other_identifiers() {
        let lines = vec![
            "void mainImage(out vec4 c, in vec2 p) {}".to_string(),
            "float domain(float x) { return x; }".to_string(),
            "void   main ( ) {}".to_string(),
        ];
        assert_eq!(find_main(&lines), Some((2, 7)));
    }
}
