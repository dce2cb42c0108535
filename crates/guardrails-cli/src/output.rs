use crossterm::style::{Color, Stylize};
use guardrails_types::CircuitState;
use serde::Serialize;
use std::env;
use std::io::{self, IsTerminal};

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn detect(no_color: bool) -> Self {
        Self {
            enabled: !no_color && env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal(),
        }
    }

    pub fn paint(self, text: &str, color: Color) -> String {
        if self.enabled {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn bold(self, text: &str) -> String {
        if self.enabled {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn state(self, state: CircuitState, text: &str) -> String {
        let color = match state {
            CircuitState::Closed => Color::Green,
            CircuitState::HalfOpen => Color::Yellow,
            CircuitState::Open => Color::Red,
        };
        self.paint(text, color)
    }
}

// `style` gets the padded cell so colour codes never affect the widths.
pub fn print_table<F>(headers: &[&str], rows: &[Vec<String>], style: F)
where
    F: Fn(usize, usize, String) -> String,
{
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{h:w$}"))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for (r, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                style(r, i, format!("{cell:w$}"))
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}
