//! Embedded prompts
//!
//! These are compiled into the binary from .pmt files at build time.

/// Default system prompt template
pub const SYSTEM: &str = include_str!("../../prompts/system.pmt");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_placeholders() {
        assert!(SYSTEM.contains("customer-service assistant"));
        assert!(SYSTEM.contains("{{summary}}"));
        assert!(SYSTEM.contains("{{user_name}}"));
    }
}
