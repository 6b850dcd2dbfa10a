//! Generated symbol names and the identifiers we must avoid colliding with

pub const STAGE_IN_VAR_NAME: &str = "in";
pub const STAGE_OUT_VAR_NAME: &str = "out";
pub const STAGE_UNIFORM_VAR_NAME: &str = "uniforms";
pub const SAMPLER_NAME_SUFFIX: &str = "Smplr";

/// MSL keywords that user variables and struct members may not shadow
pub const RESERVED_KEYWORDS: &[&str] = &["kernel", "bias"];

/// Function names that collide with the Metal standard library or the
/// translation unit structure
pub const RESERVED_FUNCTION_NAMES: &[&str] = &["main", "saturate"];

/// Rename a reserved identifier by appending a digit
pub fn sanitize_reserved(name: &mut String, reserved: &[&str]) {
    if reserved.contains(&name.as_str()) {
        name.push('0');
    }
}

/// Compiler generated names start with an underscore and a digit, which is not
/// a valid identifier start for user-facing struct members. Prefix them.
pub fn ensure_valid_name(name: String, prefix: &str) -> String {
    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some('_'), Some(digit)) if digit.is_ascii_digit() => format!("{}{}", prefix, name),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_names_get_prefixed() {
        assert_eq!(ensure_valid_name(String::from("_21"), "m"), "m_21");
        assert_eq!(ensure_valid_name(String::from("color"), "m"), "color");
        assert_eq!(ensure_valid_name(String::from("_fine"), "m"), "_fine");
    }

    #[test]
    fn reserved_names_get_suffixed() {
        let mut name = String::from("kernel");
        sanitize_reserved(&mut name, RESERVED_KEYWORDS);
        assert_eq!(name, "kernel0");

        let mut name = String::from("position");
        sanitize_reserved(&mut name, RESERVED_KEYWORDS);
        assert_eq!(name, "position");
    }
}
