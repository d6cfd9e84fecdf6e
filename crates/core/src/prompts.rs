use crate::extractor::PageText;

const DECK_PROMPT: &str = r#"You are analyzing a presentation deck used in an agency or consulting context.

You receive the deck text, slide by slide, in this format:

"Slide 1:
[text]

Slide 2:
[text]

..."

Produce a JSON object with this exact shape:

{
  "deck_title": "cleaned up title in one line",
  "deck_summary": "2-4 sentences in plain language that explain what this deck is about and what problem it addresses.",
  "main_themes": ["short phrase", "..."],
  "primary_audiences": ["job roles or industries", "..."],
  "use_cases_for_other_presentations": ["Short sentence describing when this deck is useful to reuse in another presentation.", "..."]
}

Rules:
Only use information clearly present in the text.
If you are not sure about a field, use an empty string or an empty array as appropriate.
Respond with JSON only, no commentary.

Deck text:
{{DECK_TEXT}}
"#;

const TOPICS_PROMPT: &str = r#"You are analyzing a full presentation deck and must segment it into logical topics that represent distinct parts of the story.

You receive the deck text, slide by slide, in this format:

"Slide 1:
[text]

Slide 2:
[text]

..."

Return a JSON object {"topics": [...]} where each topic has this exact shape:

{
  "topic_title": "short name for this topic",
  "topic_summary": "3-5 sentence description of what this topic covers in plain language.",
  "story_context": "one of: 'credibility', 'market_problem', 'solution_vision', 'implementation', 'results', 'other'. Choose the closest.",
  "topics": ["short keyword or phrase", "..."],
  "reuse_suggestions": ["Short sentence describing how this topic could be reused in another presentation.", "..."],
  "slide_numbers": [list of slide numbers this topic covers]
}

Rules:
Use only information clearly present in the deck text.
Create around 5 to 12 topics for a typical deck.
Slide numbers must match the input slide numbers.
Respond with JSON only, no commentary.

Deck text:
{{DECK_TEXT}}
"#;

const SLIDE_PROMPT: &str = r#"You are labeling a single presentation slide.

You receive the text content of a slide. Return a JSON object with this exact shape:

{
  "slide_type": "one of: 'case_study', 'vision', 'market_context', 'data_chart', 'model', 'process', 'roadmap', 'cover', 'credits', 'other'",
  "slide_caption": "one sentence in plain language that explains what this slide is about.",
  "topics": ["short keyword or phrase", "..."],
  "reusable": "yes" or "no" or "needs_edit"
}

Rules:
Use only the information present in the slide text.
Keep slide_caption short and concrete.
Respond with JSON only, no commentary.

Slide text:
{{SLIDE_TEXT}}
"#;

pub const CHAT_SYSTEM_PROMPT: &str = "You are a presentation assistant helping internal teams reuse slides and sections from existing decks.

You receive:
- A user request.
- A list of snippets describing topics and slides from existing decks.

Your goals:
- Suggest how the user can structure their story.
- Recommend specific decks and slide numbers.
- For each recommendation, explain in 1-2 sentences why it is relevant.
- Only use information from the provided snippets. If something is not covered, say that it is not available. Never state facts the snippets do not support.

Keep the answer concise and practical. Write 'Deck: [title], Slides: [numbers]' when you reference material.";

/// Renders slides as `Slide N:\n<text>` blocks separated by blank lines.
pub fn format_deck_text(slides: &[PageText]) -> String {
    slides
        .iter()
        .map(|slide| format!("Slide {}:\n{}", slide.number, slide.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn deck_prompt(deck_text: &str) -> String {
    DECK_PROMPT.replace("{{DECK_TEXT}}", deck_text)
}

pub fn topics_prompt(deck_text: &str) -> String {
    TOPICS_PROMPT.replace("{{DECK_TEXT}}", deck_text)
}

pub fn slide_prompt(slide_text: &str) -> String {
    SLIDE_PROMPT.replace("{{SLIDE_TEXT}}", slide_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deck_text_lists_slides_in_order() {
        let slides = vec![
            PageText {
                number: 1,
                text: "Cover".to_string(),
            },
            PageText {
                number: 2,
                text: "Revenue".to_string(),
            },
        ];

        let text = format_deck_text(&slides);

        assert_eq!(text, "Slide 1:\nCover\n\nSlide 2:\nRevenue");
        assert!(deck_prompt(&text).ends_with("Slide 2:\nRevenue\n"));
        assert!(!topics_prompt(&text).contains("{{DECK_TEXT}}"));
    }
}
