//! トークナイザ + パーサー: 展開済みの行からパイプライン AST を構築する。
//!
//! 処理は 3 段:
//!
//! 1. 行末の未クォート `&` を検出して剥がす（バックグラウンド指定）
//! 2. クォートを尊重して `|` で分割（クォート内の `|` はリテラル）
//! 3. 各セグメントをトークナイズし、リダイレクト（`<`, `>`, `>>`）を抽出
//!
//! トークナイザはクォートの解決とエスケープの解決を担当する。展開は
//! [`expand`](crate::expand) で実施済みであり、ここでは行わない。
//! 隣接トークンは 1 ワードに結合する（`a"b"'c'` → `abc`）。
//! クォートなしで切り出せたワードは `Cow::Borrowed`（ゼロコピー）、
//! エスケープや結合が入ったワードは `Cow::Owned` になる。
//!
//! 閉じられていないクォートはエラーにせず、行末までをクォート領域として
//! 受理する。

use std::borrow::Cow;
use std::fmt;

// ── AST ─────────────────────────────────────────────────────────────

/// パイプラインで接続されたコマンド列と、バックグラウンド実行指定。
#[derive(Debug, PartialEq)]
pub struct Pipeline<'a> {
    pub commands: Vec<Command<'a>>,
    pub background: bool,
}

/// 単一コマンド（パイプラインの 1 段）。
///
/// リダイレクトは種別ごとに高々 1 つ。同種が複数書かれた場合は最後の
/// 指定が有効（bash 互換）。`append` は `outfile` があるときだけ意味を持つ。
#[derive(Debug, PartialEq)]
pub struct Command<'a> {
    pub argv: Vec<Cow<'a, str>>,
    pub infile: Option<Cow<'a, str>>,
    pub outfile: Option<Cow<'a, str>>,
    pub append: bool,
}

// ── Error ───────────────────────────────────────────────────────────

/// パース時に発生しうるエラー。
#[derive(Debug, PartialEq)]
pub enum ParseError {
    /// リダイレクト演算子の後にターゲットファイル名がない。
    MissingRedirectTarget,
    /// パイプの前後にコマンドがない（`| ls`, `ls |`, リダイレクトのみ等）。
    EmptyPipelineSegment,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRedirectTarget => write!(f, "syntax error: missing redirect target"),
            Self::EmptyPipelineSegment => write!(f, "syntax error near unexpected token `|`"),
        }
    }
}

// ── 行レベルの分割 ──────────────────────────────────────────────────

/// 行末の未クォート `&` を検出する。
///
/// 戻り値: `(残りの行, background)`。`&` がクォート内にある場合はリテラル。
fn strip_background(input: &str) -> (&str, bool) {
    let bytes = input.as_bytes();
    let mut in_sq = false;
    let mut in_dq = false;
    let mut last = None; // (位置, クォート内か)

    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' if !in_sq => {
                // エスケープされた文字はリテラル扱い（`\&` は background にしない）
                if pos + 1 < bytes.len() {
                    last = Some((pos + 1, true));
                    pos += 1;
                } else {
                    last = Some((pos, true));
                }
            }
            b'\'' if !in_dq => in_sq = !in_sq,
            b'"' if !in_sq => in_dq = !in_dq,
            b if !b.is_ascii_whitespace() => last = Some((pos, in_sq || in_dq)),
            _ => {}
        }
        pos += 1;
    }

    match last {
        Some((pos, false)) if bytes[pos] == b'&' => (&input[..pos], true),
        _ => (input, false),
    }
}

/// クォートを尊重して `|` で分割し、各部分を trim して返す。
fn split_pipes(input: &str) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut parts = Vec::new();
    let mut in_sq = false;
    let mut in_dq = false;
    let mut start = 0;

    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'\\' if !in_sq => pos += 1,
            b'\'' if !in_dq => in_sq = !in_sq,
            b'"' if !in_sq => in_dq = !in_dq,
            b'|' if !in_sq && !in_dq => {
                parts.push(input[start..pos].trim());
                start = pos + 1;
            }
            _ => {}
        }
        pos += 1;
    }
    parts.push(input[start..].trim());
    parts
}

// ── Tokenizer (crate-private) ───────────────────────────────────────

/// セグメント内トークン。パイプはセグメント分割で消費済みなのでここには現れない。
enum Token<'a> {
    Word(Cow<'a, str>),
    RedirectIn,
    RedirectOut,
    RedirectAppend,
}

/// セグメント文字列をトークン列に変換するイテレータ。
///
/// 空白をスキップし、演算子とワードを識別する。ワードは隣接する
/// ベア・クォート・エスケープ片を 1 つに結合して返す。
struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    /// ワードを 1 つ読み取る。呼び出し時点で先頭はワード構成文字。
    ///
    /// ベア片・`'...'` 片・`"..."` 片・`\x` 片を空白か演算子に当たるまで
    /// 結合する。単一のベア片だけなら `Cow::Borrowed` を返す。
    fn read_word(&mut self) -> Cow<'a, str> {
        let bytes = self.input.as_bytes();
        let len = self.input.len();
        let word_start = self.pos;
        let mut owned: Option<String> = None;
        // 未コピーのベア片の開始位置
        let mut run_start = self.pos;

        // 特殊文字に当たったら owned バッファを用意する（ベア片は別途追記）
        fn flush(owned: &mut Option<String>) {
            if owned.is_none() {
                *owned = Some(String::new());
            }
        }

        while self.pos < len {
            match bytes[self.pos] {
                b'\'' => {
                    flush(&mut owned);
                    let buf = owned.as_mut().unwrap();
                    buf.push_str(&self.input[run_start..self.pos]);
                    self.pos += 1;
                    let q_start = self.pos;
                    while self.pos < len && bytes[self.pos] != b'\'' {
                        self.pos += 1;
                    }
                    buf.push_str(&self.input[q_start..self.pos]);
                    if self.pos < len {
                        self.pos += 1; // 閉じクォート
                    }
                    run_start = self.pos;
                }
                b'"' => {
                    flush(&mut owned);
                    let buf = owned.as_mut().unwrap();
                    buf.push_str(&self.input[run_start..self.pos]);
                    self.pos += 1;
                    while self.pos < len && bytes[self.pos] != b'"' {
                        if bytes[self.pos] == b'\\' && self.pos + 1 < len {
                            self.pos += 1;
                        }
                        let ch_start = self.pos;
                        let ch = self.input[ch_start..].chars().next().unwrap();
                        self.pos += ch.len_utf8();
                        buf.push_str(&self.input[ch_start..self.pos]);
                    }
                    if self.pos < len {
                        self.pos += 1; // 閉じクォート
                    }
                    run_start = self.pos;
                }
                b'\\' => {
                    flush(&mut owned);
                    let buf = owned.as_mut().unwrap();
                    buf.push_str(&self.input[run_start..self.pos]);
                    self.pos += 1;
                    if self.pos < len {
                        let ch_start = self.pos;
                        let ch = self.input[ch_start..].chars().next().unwrap();
                        self.pos += ch.len_utf8();
                        buf.push_str(&self.input[ch_start..self.pos]);
                    } else {
                        buf.push('\\'); // 行末の裸のバックスラッシュ
                    }
                    run_start = self.pos;
                }
                b' ' | b'\t' | b'\n' | b'\r' | b'<' | b'>' | b'|' => break,
                _ => self.pos += 1,
            }
        }

        match owned {
            Some(mut buf) => {
                buf.push_str(&self.input[run_start..self.pos]);
                Cow::Owned(buf)
            }
            None => Cow::Borrowed(&self.input[word_start..self.pos]),
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let ch = self.peek()?;

        match ch {
            b'>' => {
                self.pos += 1;
                if self.peek() == Some(b'>') {
                    self.pos += 1;
                    Some(Token::RedirectAppend)
                } else {
                    Some(Token::RedirectOut)
                }
            }
            b'<' => {
                self.pos += 1;
                Some(Token::RedirectIn)
            }
            _ => Some(Token::Word(self.read_word())),
        }
    }
}

// ── Parser ──────────────────────────────────────────────────────────

/// 1 セグメントをパースして [`Command`] を返す。
///
/// リダイレクト演算子は直後のワードをターゲットとして消費する
/// （`>file` と `> file` のどちらの形式も可）。同種のリダイレクトが
/// 複数あれば最後の指定が勝つ。
fn parse_segment(segment: &str) -> Result<Command<'_>, ParseError> {
    let mut argv: Vec<Cow<'_, str>> = Vec::new();
    let mut infile = None;
    let mut outfile = None;
    let mut append = false;

    let mut tokens = Tokenizer::new(segment);
    while let Some(token) = tokens.next() {
        match token {
            Token::Word(w) => argv.push(w),
            redirect => {
                let target = match tokens.next() {
                    Some(Token::Word(w)) => w,
                    _ => return Err(ParseError::MissingRedirectTarget),
                };
                match redirect {
                    Token::RedirectIn => infile = Some(target),
                    Token::RedirectOut => {
                        outfile = Some(target);
                        append = false;
                    }
                    Token::RedirectAppend => {
                        outfile = Some(target);
                        append = true;
                    }
                    Token::Word(_) => unreachable!(),
                }
            }
        }
    }

    // リダイレクト抽出後に argv が空のセグメントは構文エラー
    if argv.is_empty() {
        return Err(ParseError::EmptyPipelineSegment);
    }

    Ok(Command {
        argv,
        infile,
        outfile,
        append,
    })
}

/// 展開済みの行をパースして `Pipeline` AST を返す。
///
/// - 空行（trim 後に空） → `Ok(None)`
/// - 正常なコマンド → `Ok(Some(Pipeline))`
/// - 構文エラー → `Err(ParseError)`
pub fn parse(input: &str) -> Result<Option<Pipeline<'_>>, ParseError> {
    if input.trim().is_empty() {
        return Ok(None);
    }

    let (line, background) = strip_background(input);
    if line.trim().is_empty() {
        // `&` 単独
        return Err(ParseError::EmptyPipelineSegment);
    }

    let mut commands = Vec::new();
    for segment in split_pipes(line) {
        if segment.is_empty() {
            return Err(ParseError::EmptyPipelineSegment);
        }
        commands.push(parse_segment(segment)?);
    }

    Ok(Some(Pipeline {
        commands,
        background,
    }))
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// パース結果から各コマンドの引数を文字列ベクタとして取り出す。
    fn parse_args(input: &str) -> Vec<Vec<String>> {
        let pipeline = parse(input).unwrap().unwrap();
        pipeline
            .commands
            .iter()
            .map(|cmd| cmd.argv.iter().map(|a| a.to_string()).collect())
            .collect()
    }

    /// コマンドを再シリアライズする（ラウンドトリップ検証用の整形出力）。
    fn render(cmd: &Command<'_>) -> String {
        let quote = |w: &str| -> String {
            if w.is_empty() || w.bytes().any(|b| b.is_ascii_whitespace() || matches!(b, b'|' | b'<' | b'>' | b'\'' | b'"' | b'\\' | b'&')) {
                format!("'{}'", w)
            } else {
                w.to_string()
            }
        };
        let mut out: Vec<String> = cmd.argv.iter().map(|a| quote(a)).collect();
        if let Some(f) = &cmd.infile {
            out.push(format!("< {}", quote(f)));
        }
        if let Some(f) = &cmd.outfile {
            let op = if cmd.append { ">>" } else { ">" };
            out.push(format!("{} {}", op, quote(f)));
        }
        out.join(" ")
    }

    // ── 単純コマンド ──

    #[test]
    fn simple_command() {
        assert_eq!(
            parse_args("echo hello world"),
            vec![vec!["echo", "hello", "world"]],
        );
    }

    #[test]
    fn extra_whitespace() {
        assert_eq!(parse_args("  echo   hello  "), vec![vec!["echo", "hello"]]);
    }

    #[test]
    fn empty_input() {
        assert!(parse("").unwrap().is_none());
        assert!(parse("   \t ").unwrap().is_none());
    }

    // ── クォート ──

    #[test]
    fn single_quotes_preserve_spaces() {
        assert_eq!(
            parse_args("echo 'hello   world'"),
            vec![vec!["echo", "hello   world"]],
        );
    }

    #[test]
    fn double_quotes_preserve_spaces() {
        assert_eq!(parse_args("echo \"a  b\""), vec![vec!["echo", "a  b"]]);
    }

    #[test]
    fn empty_quotes_make_empty_word() {
        assert_eq!(parse_args("echo ''"), vec![vec!["echo", ""]]);
    }

    #[test]
    fn adjacent_pieces_concatenate() {
        assert_eq!(parse_args("echo a\"b\"'c'd"), vec![vec!["echo", "abcd"]]);
    }

    #[test]
    fn quoted_pipe_is_literal() {
        assert_eq!(parse_args("echo 'a|b'"), vec![vec!["echo", "a|b"]]);
        assert_eq!(parse_args("echo \"a|b\""), vec![vec!["echo", "a|b"]]);
    }

    #[test]
    fn unterminated_quote_is_lenient() {
        // 行末までをクォート領域として受理する
        assert_eq!(parse_args("echo 'abc def"), vec![vec!["echo", "abc def"]]);
        assert_eq!(parse_args("echo \"abc def"), vec![vec!["echo", "abc def"]]);
    }

    // ── エスケープ ──

    #[test]
    fn backslash_escapes_space() {
        assert_eq!(parse_args("echo a\\ b"), vec![vec!["echo", "a b"]]);
    }

    #[test]
    fn backslash_escapes_quote() {
        assert_eq!(parse_args("echo \\'x"), vec![vec!["echo", "'x"]]);
    }

    #[test]
    fn backslash_in_double_quotes() {
        assert_eq!(parse_args("echo \"a\\\"b\""), vec![vec!["echo", "a\"b"]]);
    }

    #[test]
    fn trailing_backslash_is_literal() {
        assert_eq!(parse_args("echo a\\"), vec![vec!["echo", "a\\"]]);
    }

    // ── パイプライン ──

    #[test]
    fn two_stage_pipeline() {
        assert_eq!(
            parse_args("ls | grep foo"),
            vec![vec!["ls"], vec!["grep", "foo"]],
        );
    }

    #[test]
    fn three_stage_pipeline() {
        assert_eq!(
            parse_args("cat file | grep name | head -1"),
            vec![vec!["cat", "file"], vec!["grep", "name"], vec!["head", "-1"]],
        );
    }

    #[test]
    fn err_leading_pipe() {
        assert_eq!(parse("| ls"), Err(ParseError::EmptyPipelineSegment));
    }

    #[test]
    fn err_trailing_pipe() {
        assert_eq!(parse("ls |"), Err(ParseError::EmptyPipelineSegment));
    }

    #[test]
    fn err_double_pipe() {
        assert_eq!(parse("ls | | grep x"), Err(ParseError::EmptyPipelineSegment));
    }

    // ── バックグラウンド ──

    #[test]
    fn background_ampersand() {
        let p = parse("sleep 30 &").unwrap().unwrap();
        assert!(p.background);
        assert_eq!(p.commands[0].argv, vec!["sleep", "30"]);
    }

    #[test]
    fn background_ampersand_attached() {
        let p = parse("sleep 30&").unwrap().unwrap();
        assert!(p.background);
        assert_eq!(p.commands[0].argv, vec!["sleep", "30"]);
    }

    #[test]
    fn quoted_ampersand_is_literal() {
        let p = parse("echo 'a &'").unwrap().unwrap();
        assert!(!p.background);
        assert_eq!(p.commands[0].argv, vec!["echo", "a &"]);
    }

    #[test]
    fn err_lone_ampersand() {
        assert_eq!(parse("&"), Err(ParseError::EmptyPipelineSegment));
    }

    // ── リダイレクト ──

    #[test]
    fn redirect_output_detached() {
        let p = parse("echo hello > out.txt").unwrap().unwrap();
        let cmd = &p.commands[0];
        assert_eq!(cmd.argv, vec!["echo", "hello"]);
        assert_eq!(cmd.outfile.as_deref(), Some("out.txt"));
        assert!(!cmd.append);
    }

    #[test]
    fn redirect_output_attached() {
        let p = parse("echo hello >out.txt").unwrap().unwrap();
        assert_eq!(p.commands[0].outfile.as_deref(), Some("out.txt"));
    }

    #[test]
    fn redirect_append() {
        let p = parse("echo hello >> out.txt").unwrap().unwrap();
        assert_eq!(p.commands[0].outfile.as_deref(), Some("out.txt"));
        assert!(p.commands[0].append);
    }

    #[test]
    fn redirect_input() {
        let p = parse("cat < in.txt").unwrap().unwrap();
        assert_eq!(p.commands[0].infile.as_deref(), Some("in.txt"));
    }

    #[test]
    fn redirect_quoted_target() {
        let p = parse("cat < 'my file.txt'").unwrap().unwrap();
        assert_eq!(p.commands[0].infile.as_deref(), Some("my file.txt"));
    }

    #[test]
    fn redirect_last_wins() {
        let p = parse("echo x > a.txt >> b.txt").unwrap().unwrap();
        let cmd = &p.commands[0];
        assert_eq!(cmd.outfile.as_deref(), Some("b.txt"));
        assert!(cmd.append);

        let p = parse("echo x >> a.txt > b.txt").unwrap().unwrap();
        let cmd = &p.commands[0];
        assert_eq!(cmd.outfile.as_deref(), Some("b.txt"));
        assert!(!cmd.append);
    }

    #[test]
    fn redirects_in_pipeline() {
        let p = parse("cat < in.txt | grep x > out.txt").unwrap().unwrap();
        assert_eq!(p.commands.len(), 2);
        assert_eq!(p.commands[0].infile.as_deref(), Some("in.txt"));
        assert_eq!(p.commands[1].outfile.as_deref(), Some("out.txt"));
    }

    #[test]
    fn err_missing_redirect_target() {
        assert_eq!(parse("echo >"), Err(ParseError::MissingRedirectTarget));
        assert_eq!(parse("cat <"), Err(ParseError::MissingRedirectTarget));
    }

    #[test]
    fn err_redirect_only_segment() {
        assert_eq!(parse("> out.txt"), Err(ParseError::EmptyPipelineSegment));
    }

    // ── Cow の借用 ──

    #[test]
    fn plain_words_are_borrowed() {
        let p = parse("echo hello").unwrap().unwrap();
        for arg in &p.commands[0].argv {
            assert!(matches!(arg, Cow::Borrowed(_)), "expected Borrowed, got Owned");
        }
    }

    #[test]
    fn quoted_words_are_owned() {
        let p = parse("echo 'hello world'").unwrap().unwrap();
        assert!(matches!(&p.commands[0].argv[1], Cow::Owned(_)));
    }

    // ── ラウンドトリップ ──

    #[test]
    fn render_reparse_roundtrip() {
        let inputs = [
            "echo hello world",
            "echo 'a  b' > out.txt",
            "sort -r < 'my in.txt' >> log",
        ];
        for input in inputs {
            let p = parse(input).unwrap().unwrap();
            let rendered = render(&p.commands[0]);
            let reparsed = parse(&rendered).unwrap().unwrap();
            assert_eq!(p.commands[0], reparsed.commands[0], "input: {}", input);
        }
    }
}
