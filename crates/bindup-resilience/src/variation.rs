//! Text variations from the English ↔ Japanese UI term map.
//!
//! BiNDup renders its editor in Japanese while suites describe elements in
//! English (and the other way round for some dialogs). When no selector
//! matches, the resolver retries a text lookup for each variation produced
//! here. Output order is deterministic: the description itself, whole-phrase
//! translations, then single-term translations.

/// Whole phrases, checked before single terms
const PHRASES: &[(&str, &str)] = &[
    ("add block", "ブロックを追加"),
    ("add page", "ページを追加"),
    ("add image", "画像を追加"),
    ("create site", "サイトを作成"),
    ("new site", "新規サイト"),
    ("start guide", "スタートガイド"),
    ("site settings", "サイト設定"),
    ("page settings", "ページ設定"),
    ("site editor", "サイトエディタ"),
    ("image management", "画像管理"),
    ("log out", "ログアウト"),
    ("select template", "テンプレートを選択"),
];

/// Single terms
const TERMS: &[(&str, &str)] = &[
    ("menu", "メニュー"),
    ("add", "追加"),
    ("block", "ブロック"),
    ("site", "サイト"),
    ("page", "ページ"),
    ("create", "作成"),
    ("edit", "編集"),
    ("delete", "削除"),
    ("remove", "削除"),
    ("duplicate", "複製"),
    ("copy", "コピー"),
    ("move", "移動"),
    ("save", "保存"),
    ("publish", "公開"),
    ("upload", "アップロード"),
    ("image", "画像"),
    ("template", "テンプレート"),
    ("settings", "設定"),
    ("close", "閉じる"),
    ("cancel", "キャンセル"),
    ("next", "次へ"),
    ("back", "戻る"),
    ("skip", "スキップ"),
    ("start", "開始"),
    ("preview", "プレビュー"),
    ("confirm", "確認"),
    ("search", "検索"),
];

/// Words that only describe the control type
const NOISE: &[&str] = &["button", "link", "icon", "tab", "ボタン", "リンク"];

/// Translation direction detected from the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToJapanese,
    ToEnglish,
}

fn direction(text: &str) -> Direction {
    if text.chars().any(is_japanese) {
        Direction::ToEnglish
    } else {
        Direction::ToJapanese
    }
}

fn is_japanese(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}' | '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}' | '\u{FF66}'..='\u{FF9F}')
}

fn push_unique(out: &mut Vec<String>, candidate: String) {
    let candidate = candidate.trim().to_string();
    if !candidate.is_empty() && !out.contains(&candidate) {
        out.push(candidate);
    }
}

/// English words of `text` with control-type noise removed
fn significant_words(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .map(str::to_lowercase)
        .filter(|w| !w.is_empty() && !NOISE.contains(&w.as_str()))
        .collect()
}

/// Look up one single-term translation in either direction
#[must_use]
pub fn translate_term(term: &str) -> Option<&'static str> {
    let lowered = term.trim().to_lowercase();
    TERMS
        .iter()
        .chain(PHRASES.iter())
        .find_map(|(en, ja)| {
            if *en == lowered {
                Some(*ja)
            } else if *ja == term.trim() {
                Some(*en)
            } else {
                None
            }
        })
}

/// Alternate text strings for a description, most specific first
#[must_use]
pub fn text_variations(description: &str) -> Vec<String> {
    let mut out = Vec::new();
    let description = description.trim();
    if description.is_empty() {
        return out;
    }
    push_unique(&mut out, description.to_string());

    match direction(description) {
        Direction::ToJapanese => {
            let words = significant_words(description);
            let phrase = words.join(" ");
            if !phrase.is_empty() && phrase != description.to_lowercase() {
                push_unique(&mut out, stripped_original(description));
            }

            for (en, ja) in PHRASES {
                if phrase.contains(en) {
                    push_unique(&mut out, (*ja).to_string());
                }
            }

            let translated: Vec<&str> = words.iter().filter_map(|w| lookup_en(w)).collect();
            if translated.len() > 1 {
                push_unique(&mut out, translated.concat());
            }
            for ja in translated {
                push_unique(&mut out, ja.to_string());
            }
        }
        Direction::ToEnglish => {
            let without_noise = NOISE
                .iter()
                .fold(description.to_string(), |acc, n| acc.replace(n, ""));
            push_unique(&mut out, without_noise.clone());

            for (en, ja) in PHRASES.iter().chain(TERMS.iter()) {
                if without_noise.contains(ja) {
                    push_unique(&mut out, capitalize(en));
                }
            }
        }
    }

    out
}

fn lookup_en(word: &str) -> Option<&'static str> {
    TERMS.iter().find(|(en, _)| *en == word).map(|(_, ja)| *ja)
}

/// The description with control-type words dropped, original casing kept
fn stripped_original(description: &str) -> String {
    description
        .split_whitespace()
        .filter(|w| !NOISE.contains(&w.to_lowercase().as_str()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_menu_translates() {
        let variations = text_variations("menu");
        assert_eq!(variations, vec!["menu".to_string(), "メニュー".to_string()]);
    }

    #[test]
    fn test_phrase_before_terms() {
        let variations = text_variations("Add Block Button");
        assert_eq!(variations[0], "Add Block Button");
        assert_eq!(variations[1], "Add Block");
        let phrase = variations.iter().position(|v| v == "ブロックを追加").unwrap();
        let term = variations.iter().position(|v| v == "ブロック").unwrap();
        assert!(phrase < term);
        assert!(variations.contains(&"追加ブロック".to_string()));
    }

    #[test]
    fn test_japanese_to_english() {
        let variations = text_variations("保存ボタン");
        assert_eq!(variations[0], "保存ボタン");
        assert!(variations.contains(&"保存".to_string()));
        assert!(variations.contains(&"Save".to_string()));
    }

    #[test]
    fn test_no_duplicates() {
        let variations = text_variations("delete remove");
        let deletes = variations.iter().filter(|v| *v == "削除").count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn test_untranslatable_keeps_description() {
        assert_eq!(text_variations("Zyxwv"), vec!["Zyxwv".to_string()]);
        assert!(text_variations("   ").is_empty());
    }

    #[test]
    fn test_translate_term_both_ways() {
        assert_eq!(translate_term("Menu"), Some("メニュー"));
        assert_eq!(translate_term("メニュー"), Some("menu"));
        assert_eq!(translate_term("start guide"), Some("スタートガイド"));
        assert_eq!(translate_term("unknown"), None);
    }
}
