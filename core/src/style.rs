use std::collections::HashMap;

use colored::{Color, ColoredString, Colorize};
use crossterm::terminal;

use crate::normalize::{self, LineDiff};
use crate::testing::{BuildReport, TestResult, TestStatus};

/// Differing lines shown per failed case.
pub const MAX_DIFF_LINES: usize = 10;

/// Longest line shown in a diff, in chars.
pub const MAX_LINE_CHARS: usize = 80;

#[macro_export]
macro_rules! print_success {
    ($fmt:literal, $($e:tt)*) => {
        use ::colored::Colorize as _;
        println!("{}", format!($fmt, $($e)*).green())
    }
}

pub fn is_truecolor_supported() -> bool {
    let Ok(v) = std::env::var("COLORTERM") else {
        return false
    };
    matches!(v.as_str(), "truecolor" | "24bit")
}

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for TestStatus {
    fn color(&self) -> Color {
        use TestStatus::*;
        if !self::is_truecolor_supported() {
            return match self {
                Pass => Color::Green,
                WrongAnswer => Color::Yellow,
                Timeout => Color::Red,
                RuntimeError => Color::Magenta,
                CompileError => Color::Blue,
                InternalError => Color::White,
            };
        }

        match self {
            Pass => Color::TrueColor {
                r: 30,
                g: 180,
                b: 40,
            },
            WrongAnswer => Color::TrueColor {
                r: 210,
                g: 138,
                b: 4,
            },
            Timeout => Color::TrueColor {
                r: 220,
                g: 42,
                b: 42,
            },
            RuntimeError => Color::TrueColor {
                r: 171,
                g: 40,
                b: 200,
            },
            CompileError => Color::TrueColor {
                r: 40,
                g: 90,
                b: 210,
            },
            InternalError => Color::TrueColor {
                r: 120,
                g: 120,
                b: 120,
            },
        }
    }
}

pub fn judge_icon(status: TestStatus) -> ColoredString {
    let fg = if is_truecolor_supported() {
        Color::TrueColor {
            r: 255,
            g: 255,
            b: 255,
        }
    } else {
        Color::BrightBlack
    };
    format!(" {:<3} ", status.as_ref())
        .on_color(status.color())
        .bold()
        .color(fg)
}

/// One line of the live result list, e.g. ` AC  lib/testfile1.txt [12ms]`.
pub fn result_line(name: &str, res: &TestResult) -> String {
    format!(
        "{} {} {}",
        judge_icon(res.status),
        name,
        format!("[{}ms]", res.elapsed.as_millis()).dimmed()
    )
}

/// Cuts `line` to at most `max` chars, marking the cut with `…`.
pub fn truncate_line(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_owned();
    }
    let mut s: String = line.chars().take(max.saturating_sub(1)).collect();
    s.push('…');
    s
}

pub fn print_build_failure(report: &BuildReport) {
    println!(
        "{} {}",
        judge_icon(TestStatus::CompileError),
        "Candidate build failed".bright_red().bold()
    );
    if !report.message.is_empty() {
        println!("{}", report.message.trim_end());
    }
}

pub fn print_test_result_summary(results: &[(String, TestResult)]) {
    let bar = "-".repeat(5);
    print!("{} ", bar);

    let count: HashMap<TestStatus, usize> =
        results.iter().fold(HashMap::new(), |mut count, (_, r)| {
            *count.entry(r.status).or_default() += 1;
            count
        });

    let num_total_test = results.len();
    let num_passed = *count.get(&TestStatus::Pass).unwrap_or(&0);
    let num_failed = num_total_test - num_passed;

    if num_total_test == 0 {
        print!("{}", "No test was run".yellow());
    } else if num_passed == num_total_test {
        let msg = format!("All {} tests passed ✨", num_total_test);
        print!("{}", msg.green());
    } else {
        let summary_msg = if num_passed > 0 {
            format!("{}/{} tests failed 💣", num_failed, num_total_test)
        } else {
            format!("All {} tests failed 💀", num_total_test)
        };

        let detail_msg = count
            .iter()
            .filter(|(status, _)| !status.is_pass())
            .map(|(&status, &cnt)| {
                format!(
                    "{}{}{}",
                    self::judge_icon(status),
                    "x".dimmed(),
                    cnt.to_string().bold().bright_white(),
                )
            })
            .collect::<Vec<String>>()
            .join(", ");

        print!("{} ({})", summary_msg.bright_red(), detail_msg);
    }

    println!(" {}", bar);
}

pub fn print_test_result_detail(name: &str, res: &TestResult) {
    let (cols, _) = terminal::size().unwrap_or((40, 40));

    const BOLD_LINE: &str = "━";
    const THIN_LINE: &str = "─";

    let bold_bar = BOLD_LINE.repeat(cols as usize).blue().bold();

    let title_color = Color::BrightYellow;
    println!(
        "\n{}: {} [{}ms]\n{}",
        name.color(title_color).bold(),
        self::judge_icon(res.status),
        res.elapsed.as_millis(),
        bold_bar,
    );

    fn print_sub_title(s: &str, cols: usize) {
        println!(
            "{}{}",
            s.cyan().bold(),
            THIN_LINE
                .repeat(cols.saturating_sub(s.len() + 1))
                .bright_black(),
        )
    }

    if !res.message.is_empty() {
        print_sub_title("[message]", cols as usize);
        println!("{}", res.message.trim_end());
    }

    if res.status == TestStatus::WrongAnswer {
        let actual = res.actual_output.as_deref().unwrap_or_default();
        let expected = res.expected_output.as_deref().unwrap_or_default();
        print_sub_title("[diff]", cols as usize);
        for line in self::diff_report(&normalize::diff_lines(actual, expected)) {
            println!("{}", line);
        }
    }

    println!("{}", bold_bar);
}

/// Renders at most `MAX_DIFF_LINES` differing lines, plus a note on how many
/// were left out.
pub fn diff_report(diffs: &[LineDiff]) -> Vec<String> {
    fn side(s: Option<&str>) -> String {
        match s {
            Some(line) => truncate_line(line, MAX_LINE_CHARS),
            None => "<EOF>".to_owned(),
        }
    }

    let mut lines = Vec::new();
    for d in diffs.iter().take(MAX_DIFF_LINES) {
        lines.push(format!("line {}:", d.line_no).bold().to_string());
        lines.push(format!("  {} {}", "expected:".green(), side(d.expected)));
        lines.push(format!("  {} {}", "actual:  ".red(), side(d.actual)));
    }
    if diffs.len() > MAX_DIFF_LINES {
        lines.push(
            format!("... and {} more differing lines", diffs.len() - MAX_DIFF_LINES)
                .dimmed()
                .to_string(),
        );
    }
    lines
}
