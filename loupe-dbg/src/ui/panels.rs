//! Fixed-position debugger panels. The tiling mirrors the classic layout:
//! four 21-row windows across the top (registers, flags, stack,
//! instructions, plus disassembly when the terminal is wide enough), a
//! full-width memory dump below, output/debug quarters underneath and a
//! three-row status footer. Sections that don't fit the terminal width are
//! silently omitted.

use loupe_core::{Engine, Registers};
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Frame;

use crate::disasm;
use crate::ui::{Tone, Ui};

pub(crate) fn render(frame: &mut Frame, ui: &Ui) {
    let area = frame.area();

    if area.width < 50 || area.height < 30 {
        let warning = Paragraph::new(Span::styled("Screen too small...", style(ui, Color::Red)));
        frame.render_widget(warning, area);
        return;
    }

    let regs = ui.inner.engine.registers();

    render_registers(frame, ui, &regs);
    render_flags(frame, ui, &regs);
    render_stack(frame, ui, &regs);
    render_instructions(frame, ui, &regs);
    render_disassembly(frame, ui, &regs);
    render_memory(frame, ui);
    render_output(frame, ui);
    render_debug(frame, ui);
    render_status(frame, ui);
}

fn style(ui: &Ui, color: Color) -> Style {
    if ui.inner.colors {
        Style::default().fg(color)
    } else {
        Style::default()
    }
}

fn window<'a>(ui: &Ui, title: &'a str) -> Block<'a> {
    let block = Block::default().borders(Borders::ALL);
    if ui.inner.colors {
        block
            .title(Span::styled(title, Style::default().fg(Color::Blue)))
            .border_style(Style::default().fg(Color::DarkGray))
    } else {
        block.title(title)
    }
}

fn separator(ui: &Ui, width: u16) -> Line<'static> {
    Line::from(Span::styled(
        "─".repeat(usize::from(width.saturating_sub(2))),
        style(ui, Color::DarkGray),
    ))
}

fn register_row(ui: &Ui, cells: &[(&str, String)]) -> Line<'static> {
    let mut spans = Vec::new();
    for (index, (name, value)) in cells.iter().enumerate() {
        spans.push(Span::styled((*name).to_string(), style(ui, Color::Cyan)));
        spans.push(Span::raw(": "));
        spans.push(Span::styled(value.clone(), style(ui, Color::Yellow)));
        if index + 1 < cells.len() {
            spans.push(Span::raw(" | "));
        }
    }
    Line::from(spans)
}

fn render_registers(frame: &mut Frame, ui: &Ui, regs: &Registers) {
    let rect = Rect::new(0, 0, 54, 21);
    if frame.area().width < rect.x + rect.width {
        return;
    }

    let rows = vec![
        register_row(
            ui,
            &[
                ("EAX", format!("{:08X}", regs.eax())),
                ("AX", format!("{:04X}", regs.ax())),
                ("AH", format!("{:02X}", regs.ah())),
                ("AL", format!("{:02X}", regs.al())),
            ],
        ),
        register_row(
            ui,
            &[
                ("EBX", format!("{:08X}", regs.ebx())),
                ("BX", format!("{:04X}", regs.bx())),
                ("BH", format!("{:02X}", regs.bh())),
                ("BL", format!("{:02X}", regs.bl())),
            ],
        ),
        register_row(
            ui,
            &[
                ("ECX", format!("{:08X}", regs.ecx())),
                ("CX", format!("{:04X}", regs.cx())),
                ("CH", format!("{:02X}", regs.ch())),
                ("CL", format!("{:02X}", regs.cl())),
            ],
        ),
        register_row(
            ui,
            &[
                ("EDX", format!("{:08X}", regs.edx())),
                ("DX", format!("{:04X}", regs.dx())),
                ("DH", format!("{:02X}", regs.dh())),
                ("DL", format!("{:02X}", regs.dl())),
            ],
        ),
        separator(ui, rect.width),
        register_row(
            ui,
            &[
                ("ESI", format!("{:08X}", regs.esi())),
                ("SI", format!("{:04X}", regs.si())),
            ],
        ),
        register_row(
            ui,
            &[
                ("EDI", format!("{:08X}", regs.edi())),
                ("DI", format!("{:04X}", regs.di())),
            ],
        ),
        separator(ui, rect.width),
        register_row(
            ui,
            &[
                ("EBP", format!("{:08X}", regs.ebp())),
                ("BP", format!("{:04X}", regs.bp())),
            ],
        ),
        register_row(
            ui,
            &[
                ("ESP", format!("{:08X}", regs.esp())),
                ("SP", format!("{:04X}", regs.sp())),
            ],
        ),
        separator(ui, rect.width),
        register_row(
            ui,
            &[
                ("CS", format!("{:04X}", regs.cs())),
                ("DS", format!("{:04X}", regs.ds())),
                ("SS", format!("{:04X}", regs.ss())),
            ],
        ),
        register_row(
            ui,
            &[
                ("ES", format!("{:04X}", regs.es())),
                ("FS", format!("{:04X}", regs.fs())),
                ("GS", format!("{:04X}", regs.gs())),
            ],
        ),
        separator(ui, rect.width),
        register_row(
            ui,
            &[
                ("EIP", format!("{:08X}", regs.eip())),
                ("IP", format!("{:04X}", regs.ip())),
            ],
        ),
        separator(ui, rect.width),
        register_row(ui, &[("EFLAGS", format!("{:08X}", regs.eflags()))]),
    ];

    let panel = Paragraph::new(rows).block(window(ui, " CPU Registers "));
    frame.render_widget(panel, rect);
}

fn render_flags(frame: &mut Frame, ui: &Ui, regs: &Registers) {
    let rect = Rect::new(54, 0, 36, 21);
    if frame.area().width < rect.x + rect.width {
        return;
    }

    let eflags = regs.eflags();
    let named: [(&str, u32); 15] = [
        ("Carry", 0),
        ("Parity", 2),
        ("Adjust", 4),
        ("Zero", 6),
        ("Sign", 7),
        ("Trap", 8),
        ("Interrupt enable", 9),
        ("Direction", 10),
        ("Overflow", 11),
        ("Resume", 16),
        ("Virtual 8086", 17),
        ("Alignment check", 18),
        ("Virtual interrupt", 19),
        ("Virtual interrupt pending", 20),
        ("CPUID", 21),
    ];

    let mut rows: Vec<Line> = named
        .iter()
        .map(|(name, bit)| {
            let set = eflags & (1 << bit) != 0;
            let value = if set {
                Span::styled("Yes", style(ui, Color::Green))
            } else {
                Span::styled(" No", style(ui, Color::Red))
            };
            Line::from(vec![
                Span::styled(format!("{name:<29}"), style(ui, Color::Cyan)),
                value,
            ])
        })
        .collect();

    rows.push(separator(ui, rect.width));
    rows.push(Line::from(Span::styled(
        format!("{eflags:032b}"),
        style(ui, Color::Yellow),
    )));

    let panel = Paragraph::new(rows).block(window(ui, " CPU Flags "));
    frame.render_widget(panel, rect);
}

fn render_stack(frame: &mut Frame, ui: &Ui, regs: &Registers) {
    let rect = Rect::new(90, 0, 30, 21);
    if frame.area().width < rect.x + rect.width {
        return;
    }

    let base = Engine::get_address(regs.ss(), regs.bp());
    let mut cursor = Engine::get_address(regs.ss(), regs.sp());
    let max_rows = usize::from(rect.height) - 2;

    let mut rows = Vec::new();
    while cursor + 1 < base && rows.len() < max_rows {
        let Ok(data) = ui.inner.engine.read(cursor, 2) else {
            break;
        };
        let word = (u16::from(data[0]) << 8) | u16::from(data[1]);
        rows.push(Line::from(vec![
            Span::styled(format!("{cursor:06X}"), style(ui, Color::Cyan)),
            Span::raw(": "),
            Span::styled(format!("{word:04X}"), style(ui, Color::Yellow)),
        ]));
        cursor += 2;
    }

    if rows.is_empty() {
        for _ in 0..max_rows {
            rows.push(Line::from(Span::styled(
                ".".repeat(usize::from(rect.width) - 4),
                style(ui, Color::Red),
            )));
        }
    }

    let panel = Paragraph::new(rows).block(window(ui, " Stack Frame "));
    frame.render_widget(panel, rect);
}

fn code_window(ui: &Ui, regs: &Registers, bytes_wanted: u64) -> Option<(u64, Vec<u8>)> {
    let eip = u64::from(regs.eip());
    let available = (ui.inner.engine.memory_size() as u64)
        .saturating_sub(eip)
        .min(bytes_wanted);
    if available == 0 {
        return None;
    }
    ui.inner
        .engine
        .read(eip, available as usize)
        .ok()
        .map(|bytes| (eip, bytes))
}

fn render_instructions(frame: &mut Frame, ui: &Ui, regs: &Registers) {
    let rect = Rect::new(120, 0, 56, 21);
    if frame.area().width < rect.x + rect.width {
        return;
    }

    let mut rows = Vec::new();
    if let Some((eip, bytes)) = code_window(ui, regs, 64) {
        for line in disasm::disassemble(&bytes, eip)
            .into_iter()
            .take(usize::from(rect.height) - 2)
        {
            rows.push(Line::from(vec![
                Span::styled(line.address, style(ui, Color::Cyan)),
                Span::raw(": "),
                Span::styled(line.text, style(ui, Color::Yellow)),
            ]));
        }
    }

    let panel = Paragraph::new(rows).block(window(ui, " Instructions "));
    frame.render_widget(panel, rect);
}

fn render_disassembly(frame: &mut Frame, ui: &Ui, regs: &Registers) {
    let x = 176u16;
    if frame.area().width < x + 50 {
        return;
    }
    let rect = Rect::new(x, 0, frame.area().width - x, 21);

    let mut rows = Vec::new();
    if let Some((eip, bytes)) = code_window(ui, regs, 64) {
        for line in disasm::disassemble(&bytes, eip)
            .into_iter()
            .take(usize::from(rect.height) - 2)
        {
            rows.push(Line::from(vec![
                Span::styled(line.address, style(ui, Color::Cyan)),
                Span::raw(": "),
                Span::styled(format!("{:<21} ", line.bytes), style(ui, Color::DarkGray)),
                Span::styled(line.text, style(ui, Color::Yellow)),
            ]));
        }
    }

    let panel = Paragraph::new(rows).block(window(ui, " Disassembly "));
    frame.render_widget(panel, rect);
}

fn render_memory(frame: &mut Frame, ui: &Ui) {
    let area = frame.area();
    let rect = Rect::new(0, 21, area.width, (area.height - 21) / 2);

    let mut rows = Vec::new();
    let mut panel_state = ui.inner.memory.lock().unwrap();

    if let Some(prompt) = &panel_state.prompt {
        rows.push(Line::from(Span::styled(
            "Enter a memory address:",
            style(ui, Color::Yellow),
        )));
        rows.push(Line::from(Span::styled(
            format!("{prompt}_"),
            style(ui, Color::Cyan),
        )));
    } else {
        let cols = usize::from(area.width).saturating_sub(4);
        let bytes_per_line = (cols / 4).saturating_sub(5).max(1);
        let lines = usize::from(rect.height).saturating_sub(2).max(1);
        panel_state.bytes_per_line = bytes_per_line;
        panel_state.lines = lines;

        let offset = panel_state.offset;
        let wanted = (bytes_per_line * lines) as u64;
        let available = (ui.inner.engine.memory_size() as u64)
            .saturating_sub(offset)
            .min(wanted);

        if let Ok(bytes) = ui.inner.engine.read(offset, available as usize) {
            for (row, chunk) in bytes.chunks(bytes_per_line).enumerate() {
                let address = offset + (row * bytes_per_line) as u64;
                let mut hex = String::new();
                let mut ascii = String::new();
                for byte in chunk {
                    hex.push_str(&format!("{byte:02X} "));
                    ascii.push(if byte.is_ascii_graphic() {
                        *byte as char
                    } else {
                        '.'
                    });
                }

                rows.push(Line::from(vec![
                    Span::styled(format!("{address:016X}: "), style(ui, Color::Cyan)),
                    Span::styled(
                        format!("{hex:<width$}", width = bytes_per_line * 3),
                        style(ui, Color::Yellow),
                    ),
                    Span::styled("│ ", style(ui, Color::DarkGray)),
                    Span::raw(ascii),
                ]));
            }
        }
    }

    drop(panel_state);

    let panel = Paragraph::new(rows).block(window(ui, " Memory "));
    frame.render_widget(panel, rect);
}

/// Splits a stream into display lines, wrapping at `max` columns and keeping
/// only the last `max_lines`.
fn tail_lines(contents: &str, max: usize, max_lines: usize) -> Vec<String> {
    let mut display = Vec::new();
    for line in contents.split('\n') {
        if line.is_empty() {
            display.push(String::new());
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(max) {
            display.push(chunk.iter().collect());
        }
    }

    if display.len() > max_lines {
        display.split_off(display.len() - max_lines)
    } else {
        display
    }
}

fn render_output(frame: &mut Frame, ui: &Ui) {
    let area = frame.area();
    let rect = Rect::new(
        0,
        21 + (area.height - 21) / 2,
        area.width / 2,
        ((area.height - 21) / 2).saturating_sub(2),
    );
    if rect.height < 2 {
        return;
    }

    let max = usize::from(rect.width).saturating_sub(4).min(80).max(1);
    let rows: Vec<Line> = tail_lines(
        &ui.inner.output.contents(),
        max,
        usize::from(rect.height).saturating_sub(2),
    )
    .into_iter()
    .map(Line::from)
    .collect();

    let panel = Paragraph::new(rows).block(window(ui, " Output "));
    frame.render_widget(panel, rect);
}

fn render_debug(frame: &mut Frame, ui: &Ui) {
    let area = frame.area();
    let rect = Rect::new(
        area.width / 2,
        21 + (area.height - 21) / 2,
        area.width / 2,
        ((area.height - 21) / 2).saturating_sub(2),
    );
    if rect.height < 2 {
        return;
    }

    let max = usize::from(rect.width).saturating_sub(4).max(1);
    let rows: Vec<Line> = tail_lines(
        &ui.inner.debug.contents(),
        max,
        usize::from(rect.height).saturating_sub(2),
    )
    .into_iter()
    .map(|line| Line::from(Span::styled(line, style(ui, Color::Magenta))))
    .collect();

    let panel = Paragraph::new(rows).block(window(ui, " Debug "));
    frame.render_widget(panel, rect);
}

fn render_status(frame: &mut Frame, ui: &Ui) {
    let area = frame.area();
    let rect = Rect::new(0, area.height - 3, area.width, 3);

    let status = ui.inner.status.lock().unwrap();
    let color = match status.tone {
        Tone::Running => Color::Green,
        Tone::Paused => Color::Yellow,
        Tone::Stopped => Color::Red,
    };
    let line = Line::from(Span::styled(status.text.clone(), style(ui, color)));
    drop(status);

    let panel = Paragraph::new(line).block(window(ui, " Status "));
    frame.render_widget(panel, rect);
}

#[cfg(test)]
mod tests {
    use super::tail_lines;

    #[test]
    fn long_lines_wrap_and_old_lines_scroll_away() {
        let lines = tail_lines("abcdef\ngh", 3, 10);
        assert_eq!(lines, vec!["abc", "def", "gh"]);

        let lines = tail_lines("one\ntwo\nthree", 80, 2);
        assert_eq!(lines, vec!["two", "three"]);
    }
}
