//! 展開処理: パース前の 1 パスで変数展開とコマンド置換を行う。
//!
//! 入力行を左から右へ 1 回だけ走査し、以下の規則で置換した新しい文字列を返す。
//!
//! | 文脈 | 規則 |
//! |------|------|
//! | `'...'` | 内容をそのままコピー。展開なし。閉じクォートがなければ行末まで |
//! | `"..."` | `$` と `` ` `` の置換が有効。`\x` はペアのまま通す |
//! | `\x`（クォート外） | ペアのまま通す（直後の `$` / `` ` `` は展開されない） |
//! | `$NAME` / `${NAME}` | 環境変数の値。未設定なら空。`NAME` は `[A-Za-z_][A-Za-z0-9_]*` |
//! | `$(...)` / `` `...` `` | 子インタプリタで実行し stdout を取り込む。末尾改行は除去 |
//!
//! クォート文字とバックスラッシュは出力にそのまま残す。単語分割とクォートの
//! 解決は [`parser`](crate::parser) のトークナイザの仕事であり、ここで消して
//! しまうと `"a  b"` の空白や `"$X"'$X'` の隣接結合が失われる。
//! 展開結果に対する単語分割・glob はこのモジュールでは行わない。
//!
//! 置換コマンドの失敗は空文字列への展開として扱い、終了ステータスは伝播しない。

use crate::executor;
use crate::shell::Shell;

/// 行全体を展開した新しい文字列を返す。
pub fn expand(input: &str, shell: &mut Shell) -> String {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut pos = 0;

    while pos < len {
        match bytes[pos] {
            // エスケープペアはそのまま通す（トークナイザが解決する）
            b'\\' => pos = copy_escape_pair(input, pos, &mut out),
            // シングルクォート: 閉じクォートまで無加工コピー
            b'\'' => {
                let start = pos;
                pos += 1;
                while pos < len && bytes[pos] != b'\'' {
                    pos += 1;
                }
                if pos < len {
                    pos += 1; // 閉じクォートを含める
                }
                out.push_str(&input[start..pos]);
            }
            // ダブルクォート: 内部で $ と ` の置換を行う
            b'"' => {
                out.push('"');
                pos += 1;
                while pos < len && bytes[pos] != b'"' {
                    match bytes[pos] {
                        b'\\' => pos = copy_escape_pair(input, pos, &mut out),
                        b'$' => pos = expand_dollar(input, pos, &mut out, shell),
                        b'`' => pos = expand_backtick(input, pos, &mut out, shell),
                        _ => {
                            let start = pos;
                            while pos < len
                                && !matches!(bytes[pos], b'"' | b'\\' | b'$' | b'`')
                            {
                                pos += 1;
                            }
                            out.push_str(&input[start..pos]);
                        }
                    }
                }
                if pos < len {
                    out.push('"');
                    pos += 1;
                }
            }
            b'$' => pos = expand_dollar(input, pos, &mut out, shell),
            b'`' => pos = expand_backtick(input, pos, &mut out, shell),
            _ => {
                let start = pos;
                while pos < len
                    && !matches!(bytes[pos], b'\\' | b'\'' | b'"' | b'$' | b'`')
                {
                    pos += 1;
                }
                out.push_str(&input[start..pos]);
            }
        }
    }

    out
}

/// `pos` は `\` を指す。`\` と直後の 1 文字（UTF-8 可）をそのまま `out` に
/// コピーし、次に走査すべき位置を返す。行末の裸の `\` は単独でコピーする。
fn copy_escape_pair(input: &str, pos: usize, out: &mut String) -> usize {
    out.push('\\');
    let next = pos + 1;
    match input[next..].chars().next() {
        Some(ch) => {
            out.push(ch);
            next + ch.len_utf8()
        }
        None => next,
    }
}

// ── 変数展開 ────────────────────────────────────────────────────────

/// 変数名の先頭文字として有効か（`[A-Za-z_]`）。
fn is_name_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

/// 変数名の継続文字として有効か（`[A-Za-z0-9_]`）。
fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// `pos` は `$` を指す。`$NAME` / `${NAME}` / `$(...)` を処理して
/// 次に走査すべき位置を返す。有効な形式でなければ `$` を 1 文字コピーする。
fn expand_dollar(input: &str, pos: usize, out: &mut String, shell: &mut Shell) -> usize {
    let bytes = input.as_bytes();
    let len = bytes.len();

    // $(...) — コマンド置換
    if pos + 1 < len && bytes[pos + 1] == b'(' {
        let inner_start = pos + 2;
        let close = find_closing_paren(input, inner_start);
        out.push_str(&executor::execute_capture(&input[inner_start..close], shell));
        return if close < len { close + 1 } else { close };
    }

    // ${NAME} — ブレース区切り
    if pos + 1 < len && bytes[pos + 1] == b'{' {
        let name_start = pos + 2;
        let mut end = name_start;
        while end < len && bytes[end] != b'}' {
            end += 1;
        }
        push_env(&input[name_start..end], out);
        return if end < len { end + 1 } else { end };
    }

    // $NAME
    if pos + 1 < len && is_name_start(bytes[pos + 1]) {
        let name_start = pos + 1;
        let mut end = name_start + 1;
        while end < len && is_name_char(bytes[end]) {
            end += 1;
        }
        push_env(&input[name_start..end], out);
        return end;
    }

    // 有効な名前が続かない $ はリテラル
    out.push('$');
    pos + 1
}

/// 環境変数 `name` の値を `out` に追記する。未設定なら何もしない（空展開）。
fn push_env(name: &str, out: &mut String) {
    if let Ok(val) = std::env::var(name) {
        out.push_str(&val);
    }
}

/// `start` は `$(` の直後。対応する `)` の位置を返す（ネスト対応、
/// クォート内の括弧は数えない）。閉じ括弧がなければ行末を返す。
pub(crate) fn find_closing_paren(input: &str, start: usize) -> usize {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let mut depth = 1;
    let mut pos = start;
    while pos < len {
        match bytes[pos] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return pos;
                }
            }
            b'\'' => {
                pos += 1;
                while pos < len && bytes[pos] != b'\'' {
                    pos += 1;
                }
            }
            b'"' => {
                pos += 1;
                while pos < len && bytes[pos] != b'"' {
                    if bytes[pos] == b'\\' {
                        pos += 1;
                    }
                    pos += 1;
                }
            }
            _ => {}
        }
        pos += 1;
    }
    len
}

// ── バッククォート置換 ──────────────────────────────────────────────

/// `pos` は開き `` ` `` を指す。閉じ `` ` `` までを実行して取り込み、
/// 次に走査すべき位置を返す。閉じがなければ行末まで。
fn expand_backtick(input: &str, pos: usize, out: &mut String, shell: &mut Shell) -> usize {
    let bytes = input.as_bytes();
    let len = bytes.len();
    let inner_start = pos + 1;
    let mut end = inner_start;
    while end < len && bytes[end] != b'`' {
        end += 1;
    }
    out.push_str(&executor::execute_capture(&input[inner_start..end], shell));
    if end < len {
        end + 1
    } else {
        end
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// コマンド置換を含まない入力専用のヘルパー（Shell の fork 経路を通らない）。
    fn expand_str(input: &str) -> String {
        let mut shell = Shell::new_for_test();
        expand(input, &mut shell)
    }

    // ── 変数展開: クォート文脈ごとのテーブル ──

    #[test]
    fn bare_variable() {
        std::env::set_var("MYSHELL_T1", "foo");
        assert_eq!(expand_str("echo $MYSHELL_T1"), "echo foo");
    }

    #[test]
    fn braced_variable() {
        std::env::set_var("MYSHELL_T2", "foo");
        assert_eq!(expand_str("echo ${MYSHELL_T2}bar"), "echo foobar");
    }

    #[test]
    fn unset_variable_is_empty() {
        std::env::remove_var("MYSHELL_T3");
        assert_eq!(expand_str("a$MYSHELL_T3-b"), "a-b");
    }

    #[test]
    fn variable_in_double_quotes() {
        std::env::set_var("MYSHELL_T4", "foo");
        assert_eq!(expand_str("\"x $MYSHELL_T4 y\""), "\"x foo y\"");
    }

    #[test]
    fn single_quotes_are_identity() {
        std::env::set_var("MYSHELL_T5", "foo");
        assert_eq!(expand_str("'$MYSHELL_T5 `cmd` \\n'"), "'$MYSHELL_T5 `cmd` \\n'");
    }

    #[test]
    fn backslash_suppresses_expansion() {
        std::env::set_var("MYSHELL_T6", "foo");
        assert_eq!(expand_str("\\$MYSHELL_T6"), "\\$MYSHELL_T6");
    }

    #[test]
    fn backslash_pair_in_double_quotes_passes_through() {
        assert_eq!(expand_str("\"a\\\"b\""), "\"a\\\"b\"");
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand_str("a$ b"), "a$ b");
        assert_eq!(expand_str("price$1"), "price$1");
        assert_eq!(expand_str("end$"), "end$");
    }

    #[test]
    fn adjacent_expansions() {
        // echo $X${X}"$X"'$X' → foofoo"foo"'$X'（クォート解決はトークナイザ側）
        std::env::set_var("MYSHELL_T7", "foo");
        assert_eq!(
            expand_str("$MYSHELL_T7${MYSHELL_T7}\"$MYSHELL_T7\"'$MYSHELL_T7'"),
            "foofoo\"foo\"'$MYSHELL_T7'",
        );
    }

    #[test]
    fn name_chars_terminate_correctly() {
        std::env::set_var("MYSHELL_T8", "v");
        assert_eq!(expand_str("$MYSHELL_T8/path"), "v/path");
        assert_eq!(expand_str("$MYSHELL_T8.ext"), "v.ext");
    }

    #[test]
    fn unterminated_single_quote_runs_to_eol() {
        assert_eq!(expand_str("echo 'abc def"), "echo 'abc def");
    }

    #[test]
    fn unterminated_brace_takes_rest_as_name() {
        std::env::remove_var("MYSHELL_T9");
        assert_eq!(expand_str("x${MYSHELL_T9"), "x");
    }

    // ── 置換領域のスキャン ──

    #[test]
    fn closing_paren_simple() {
        let s = "$(echo hi) rest";
        assert_eq!(find_closing_paren(s, 2), 9);
    }

    #[test]
    fn closing_paren_nested() {
        let s = "$(echo $(echo x)) rest";
        assert_eq!(find_closing_paren(s, 2), 16);
    }

    #[test]
    fn closing_paren_ignores_quoted() {
        let s = "$(echo ')')";
        assert_eq!(find_closing_paren(s, 2), 10);
    }

    #[test]
    fn closing_paren_unterminated_is_eol() {
        let s = "$(echo hi";
        assert_eq!(find_closing_paren(s, 2), s.len());
    }
}
