/// 資格情報をログに出せる形に伏せる。先頭4文字だけ残す。
#[must_use]
pub fn redact(input: &str) -> String {
    if input.chars().count() <= 4 {
        "****".to_string()
    } else {
        let head: String = input.chars().take(4).collect();
        format!("{head}***")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secrets_are_fully_masked() {
        assert_eq!(redact("abc"), "****");
        assert_eq!(redact(""), "****");
    }

    #[test]
    fn long_secrets_keep_a_prefix() {
        assert_eq!(redact("sk-live-123456"), "sk-l***");
    }
}
