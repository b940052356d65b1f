//! Instruction template for concept graph generation.

use conceptgraph_extraction::MergePayload;

/// Fixed instructions sent ahead of the extracted document content.
pub const INSTRUCTIONS: &str = r#"You turn instructional documents (lab guides, lecture slides, course handouts, challenge write-ups) into a concept graph for a tutoring system.

Return exactly one JSON object and nothing else. The object is the root of a tree:

{
  "id": "KG",
  "name": "Central node",
  "children": [
    {
      "id": "C01",
      "name": "Short concept title",
      "definition": "One or two sentences.",
      "difficulty": "beginner | intermediate | advanced",
      "bloom_level": "Remember | Understand",
      "misconceptions": ["..."],
      "confidence": 0.9,
      "source": "<file name> [page N]",
      "connections": [{"to": "C02", "relation": "PREREQUISITE_FOR"}],
      "children": [
        {
          "id": "P01",
          "name": "Procedure title",
          "bloom_level": "Apply | Analyze",
          "success_criteria": ["..."],
          "children": [
            {
              "id": "P01-step1",
              "name": "Step 1: ...",
              "hint": "A nudge, never the full solution.",
              "children": [
                {"id": "P01-step2", "name": "Step 2: ...", "hint": "..."}
              ]
            }
          ]
        },
        {
          "id": "A01",
          "name": "Assessment title",
          "bloom_level": "Evaluate | Create",
          "question_prompts": [{"question": "..."}],
          "evaluation_criteria": ["..."]
        }
      ]
    }
  ]
}

Rules:
- Concept ids start with C, procedure ids with P, assessment ids with A. Ids are unique across the whole tree.
- Every procedure step id is the procedure id followed by -stepN. Step N+1 is a child of step N; only step 1 sits directly under the procedure.
- Procedures and assessments are children of the concept they teach or test.
- Cover every section, module or challenge found in the document with at least one concept.
- connections link concepts by id. Use relation names in UPPER_SNAKE_CASE such as PREREQUISITE_FOR, DEPENDS_ON, EXTENDS_TO, GENERALIZES_TO, IMPLEMENTED_BY, ENABLES.
- source names the document and the page or slide the concept came from.
- Hints scaffold from general to specific. Never reveal complete solutions or full code.

The extracted content follows. "textual" holds the document's own text layer as "text", "visual" holds OCR of rendered pages and pictures as "ocr_text". Both are keyed by page, slide or section."#;

/// Instructions followed by the pretty-printed payload.
pub fn build_prompt(payload: &MergePayload) -> String {
    format!("{INSTRUCTIONS}\n\n{}", payload.to_pretty_json())
}
