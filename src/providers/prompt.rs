use crate::model::GenerationRequest;

/// System message sent with every generation request
pub const RECIPE_SYSTEM_PROMPT: &str = include_str!("prompt.txt");

/// Answer layout the extraction rules expect to find in the generated text
pub const ANSWER_LAYOUT: &str = "다음 형식으로 답변해주세요:\n- 요리명:\n- 재료:\n- 조리법:\n- 조리시간:\n- 난이도:";

/// Build the user message for a request. User input only appears after the
/// `재료:` and `추가 요구사항:` labels.
pub fn build_user_prompt(request: &GenerationRequest) -> String {
    let mut prompt = format!(
        "다음 재료를 사용한 레시피를 추천해주세요:\n재료: {}",
        request.ingredients().join(", ")
    );

    if let Some(preferences) = request.preferences() {
        prompt.push_str(&format!("\n\n추가 요구사항: {}", preferences));
    }

    prompt.push_str("\n\n");
    prompt.push_str(ANSWER_LAYOUT);
    prompt
}
