//! Color Palette
//!
//! Colors shared by the transcript, input box and status bar.

use ratatui::style::Color;

// ============================================================================
// Roles
// ============================================================================

/// Assistant replies
pub const ASSISTANT_MAGENTA: Color = Color::Magenta;

/// User turns and the input box
pub const USER_GREEN: Color = Color::Rgb(130, 220, 130);

// ============================================================================
// Content
// ============================================================================

/// Code blocks
pub const CODE_CYAN: Color = Color::Rgb(140, 200, 220);

/// Video attachment lines
pub const ATTACHMENT_BLUE: Color = Color::Rgb(100, 180, 255);

// ============================================================================
// Status
// ============================================================================

/// Hints, indicators and separators
pub const DIM_GRAY: Color = Color::Rgb(100, 100, 100);

/// Stream and artifact errors
pub const ERROR_RED: Color = Color::Rgb(255, 80, 80);

/// Scroll fade near the edges
pub const FADE_DARK: Color = Color::Rgb(80, 80, 80);

/// Scroll fade one line in from the edges
pub const FADE_LIGHT: Color = Color::Rgb(120, 120, 120);
