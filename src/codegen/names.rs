//! Name Resolution
//!
//! Derives every generated name from the subject, language-agnostically:
//!
//! | subject           | data type         | package               |
//! |-------------------|-------------------|-----------------------|
//! | `UserSignup`      | `UserSignupEvent` | `UserSignupEvent_lib` |
//! | `UserSignupEvent` | `UserSignupEvent` | `UserSignupEvent_lib` |
//! | `orders-value`    | `OrdersValueEvent`| `OrdersValueEvent_lib`|
//!
//! Language-specific casing and escaping is applied by the emitters.

use serde::{Deserialize, Serialize};

const EVENT_SUFFIX: &str = "Event";

/// Names shared by every target for one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeNames {
    /// `{Subject}Event`
    pub data_type: String,
    /// `{Subject}EventProducer`
    pub producer: String,
    /// `{Subject}EventConsumer`
    pub consumer: String,
    /// `{Subject}Event_lib`
    pub package: String,
}

impl TypeNames {
    pub fn for_subject(subject: &str) -> Self {
        let data_type = event_type_name(subject);
        Self {
            producer: format!("{}Producer", data_type),
            consumer: format!("{}Consumer", data_type),
            package: format!("{}_lib", data_type),
            data_type,
        }
    }

    /// Registry-safe lowercase package id (npm, crates.io)
    pub fn package_id(&self, separator: char) -> String {
        let snake = to_snake_case(&self.data_type);
        let id = format!("{}_lib", snake);
        if separator == '_' {
            id
        } else {
            id.replace('_', &separator.to_string())
        }
    }
}

/// `{Subject}Event`, without doubling an existing `Event` suffix
pub fn event_type_name(subject: &str) -> String {
    let pascal = to_pascal_case(subject);
    let stem = pascal.strip_suffix(EVENT_SUFFIX).unwrap_or(&pascal);
    format!("{}{}", stem, EVENT_SUFFIX)
}

/// Convert to PascalCase, keeping the casing inside each word
pub fn to_pascal_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut capitalize_next = true;

    for c in s.chars() {
        if !c.is_ascii_alphanumeric() {
            capitalize_next = true;
        } else if capitalize_next {
            result.push(c.to_ascii_uppercase());
            capitalize_next = false;
        } else {
            result.push(c);
        }
    }

    result
}

/// Convert to snake_case
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;

    for c in s.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c == '-' || c == ' ' || c == '.' {
            result.push('_');
            prev_lower = false;
        } else {
            result.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_suffix_is_not_doubled() {
        assert_eq!(event_type_name("UserSignup"), "UserSignupEvent");
        assert_eq!(event_type_name("UserSignupEvent"), "UserSignupEvent");
        assert_eq!(event_type_name("orders-value"), "OrdersValueEvent");
        assert_eq!(event_type_name("com.acme.Payment"), "ComAcmePaymentEvent");
    }

    #[test]
    fn test_type_names() {
        let names = TypeNames::for_subject("UserSignupEvent");
        assert_eq!(names.data_type, "UserSignupEvent");
        assert_eq!(names.producer, "UserSignupEventProducer");
        assert_eq!(names.consumer, "UserSignupEventConsumer");
        assert_eq!(names.package, "UserSignupEvent_lib");
        assert_eq!(names.package_id('-'), "user-signup-event-lib");
        assert_eq!(names.package_id('_'), "user_signup_event_lib");
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("signupTimestamp"), "signup_timestamp");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        // All-caps is treated as individual letters
        assert_eq!(to_snake_case("API"), "api");
    }

    #[test]
    fn test_to_pascal_case() {
        assert_eq!(to_pascal_case("tenant_id"), "TenantId");
        assert_eq!(to_pascal_case("user-profile"), "UserProfile");
        assert_eq!(to_pascal_case("UserSignup"), "UserSignup");
    }
}
