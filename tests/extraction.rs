use recipe_stream::{extract_recipe, ExtractionError, RequiredField};

const TTEOKBOKKI: &str = "\
**요리명**: 치즈 떡볶이

**재료**:
* 떡볶이 떡 300g
* 고추장 2큰술, 설탕 1큰술
* 모짜렐라 치즈 100g

**만드는법**:
1) 물 400ml에 고추장과 설탕을 푼다
2) 떡을 넣고 10분간 끓인다
3) 치즈를 올려 녹인다

**조리시간**: 1시간 5분
**난이도**: 중간
3인분 기준입니다.";

#[test]
fn test_markdown_formatted_answer() {
    let recipe = extract_recipe(TTEOKBOKKI);

    assert_eq!(recipe.title, "치즈 떡볶이");
    assert_eq!(
        recipe.ingredients,
        vec!["떡볶이 떡 300g", "고추장 2큰술", "설탕 1큰술", "모짜렐라 치즈 100g"]
    );
    assert_eq!(
        recipe.instructions,
        vec![
            "물 400ml에 고추장과 설탕을 푼다",
            "떡을 넣고 10분간 끓인다",
            "치즈를 올려 녹인다"
        ]
    );
    assert_eq!(recipe.cook_time, 65);
    assert_eq!(recipe.difficulty, "중간");
    assert_eq!(recipe.servings, 3);
    assert!(recipe.validate().is_ok());
}

#[test]
fn test_section_order_does_not_matter() {
    let reordered = "난이도: 쉬움\n조리시간: 20분\n요리명: 계란말이\n재료:\n- 계란 3개\n- 파 약간\n조리법:\n1. 계란을 푼다\n2. 말아서 굽는다";
    let recipe = extract_recipe(reordered);

    assert_eq!(recipe.title, "계란말이");
    assert_eq!(recipe.ingredients, vec!["계란 3개", "파 약간"]);
    assert_eq!(recipe.instructions, vec!["계란을 푼다", "말아서 굽는다"]);
    assert_eq!(recipe.cook_time, 20);
    assert_eq!(recipe.difficulty, "쉬움");
}

#[test]
fn test_free_text_without_sections_is_invalid() {
    let recipe = extract_recipe("죄송하지만 그 재료로는 레시피를 만들기 어렵습니다.");

    assert_eq!(
        recipe.validate(),
        Err(ExtractionError::MissingFields(vec![
            RequiredField::Ingredients,
            RequiredField::Instructions
        ]))
    );
}

#[test]
fn test_extraction_is_idempotent() {
    assert_eq!(extract_recipe(TTEOKBOKKI), extract_recipe(TTEOKBOKKI));
}
