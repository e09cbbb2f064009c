//! Response shapes declared to the provider per container.

use crate::models::ContainerType;

/// The JSON structure a container's content must have.
///
/// Appended to the system text so the provider knows the exact shape the
/// validator will check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseShape {
    container: ContainerType,
    instructions: &'static str,
}

const LEARN_SHAPE: &str = r#"Respond with a single JSON object and nothing else:
{
  "instruction": {"title": string, "explanation": string, "key_points": [string]},
  "practice": [ exactly 3 items of {"question": string, "type": string, "options": [string], "answer": string, "hint": string} ],
  "assessment": {"question": string, "type": string, "options": [string], "answer": string, "explanation": string}
}
"assessment" is one object, not a list."#;

const EXPERIENCE_SHAPE: &str = r#"Respond with a single JSON object and nothing else:
{
  "examples": [ exactly 3 worked scenarios of {"title": string, "scenario": string, "steps": [string]} ],
  "practice": [ exactly 2 scenarios of {"scenario": string, "question": string, "type": string, "answer": string} ],
  "assessment": {"scenario": string, "question": string, "type": string, "answer": string}
}
"assessment" is one object, not a list."#;

const DISCOVER_SHAPE: &str = r#"Respond with a single JSON object and nothing else:
{
  "scenario": {"title": string, "narrative": string, "driving_question": string},
  "stations": [ exactly 4 items of {"title": string, "task": string, "question": string, "type": string} ]
}
Every station explores the one unifying scenario."#;

impl ResponseShape {
    /// The shape for `container`.
    #[must_use]
    pub const fn for_container(container: ContainerType) -> Self {
        let instructions = match container {
            ContainerType::Learn => LEARN_SHAPE,
            ContainerType::Experience => EXPERIENCE_SHAPE,
            ContainerType::Discover => DISCOVER_SHAPE,
        };
        Self {
            container,
            instructions,
        }
    }

    /// Container the shape belongs to.
    #[must_use]
    pub const fn container(&self) -> ContainerType {
        self.container
    }

    /// The instruction text.
    #[must_use]
    pub const fn instructions(&self) -> &'static str {
        self.instructions
    }

    /// Appends the instruction text to a system prompt.
    #[must_use]
    pub fn append_to(&self, system: &str) -> String {
        let system = system.trim_end();
        if system.is_empty() {
            return self.instructions.to_string();
        }
        format!("{system}\n\n## Response format\n\n{}", self.instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shapes_name_the_counts() {
        assert!(
            ResponseShape::for_container(ContainerType::Learn)
                .instructions()
                .contains("exactly 3")
        );
        let discover = ResponseShape::for_container(ContainerType::Discover);
        assert!(discover.instructions().contains("exactly 4"));
        assert_eq!(discover.container(), ContainerType::Discover);
    }

    #[test]
    fn test_append_to() {
        let shape = ResponseShape::for_container(ContainerType::Experience);
        let system = shape.append_to("You are a tutor.\n");
        assert!(system.starts_with("You are a tutor.\n\n## Response format"));
        assert!(system.ends_with(shape.instructions()));
        assert_eq!(shape.append_to("  "), shape.instructions());
    }
}
