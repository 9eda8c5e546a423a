/* HID usage <-> OS key code tables, covering the USB HID Usage Tables'
 * Keyboard/Keypad page (0x07) and Consumer page (0x0C). Key codes follow the
 * Linux `input-event-codes.h` numbering (KEY_A = 30, KEY_VOLUMEUP = 115, ...)
 * since that is the numbering every driver's `mapping_value` already assumes
 * for `ActionType::Key`. */

/// USB HID keyboard-page usage -> Linux key code. Index 0 is unused (usage 0
/// means "no event"); the table is sized to the contiguous block of usages
/// every keyboard firmware actually emits (0x04..=0x65).
const KEYBOARD_USAGE_TO_KEYCODE: &[(u16, u32)] = &[
    (0x04, 30),  // A
    (0x05, 48),  // B
    (0x06, 46),  // C
    (0x07, 32),  // D
    (0x08, 18),  // E
    (0x09, 33),  // F
    (0x0A, 34),  // G
    (0x0B, 35),  // H
    (0x0C, 23),  // I
    (0x0D, 36),  // J
    (0x0E, 37),  // K
    (0x0F, 38),  // L
    (0x10, 50),  // M
    (0x11, 49),  // N
    (0x12, 24),  // O
    (0x13, 25),  // P
    (0x14, 16),  // Q
    (0x15, 19),  // R
    (0x16, 31),  // S
    (0x17, 20),  // T
    (0x18, 22),  // U
    (0x19, 47),  // V
    (0x1A, 17),  // W
    (0x1B, 45),  // X
    (0x1C, 21),  // Y
    (0x1D, 44),  // Z
    (0x1E, 2),   // 1
    (0x1F, 3),   // 2
    (0x20, 4),   // 3
    (0x21, 5),   // 4
    (0x22, 6),   // 5
    (0x23, 7),   // 6
    (0x24, 8),   // 7
    (0x25, 9),   // 8
    (0x26, 10),  // 9
    (0x27, 11),  // 0
    (0x28, 28),  // Enter
    (0x29, 1),   // Escape
    (0x2A, 14),  // Backspace
    (0x2B, 15),  // Tab
    (0x2C, 57),  // Space
    (0x2D, 12),  // Minus
    (0x2E, 13),  // Equal
    (0x2F, 26),  // LeftBrace
    (0x30, 27),  // RightBrace
    (0x31, 43),  // Backslash
    (0x33, 39),  // Semicolon
    (0x34, 40),  // Apostrophe
    (0x35, 41),  // Grave
    (0x36, 51),  // Comma
    (0x37, 52),  // Dot
    (0x38, 53),  // Slash
    (0x39, 58),  // CapsLock
    (0x3A, 59),  // F1
    (0x3B, 60),  // F2
    (0x3C, 61),  // F3
    (0x3D, 62),  // F4
    (0x3E, 63),  // F5
    (0x3F, 64),  // F6
    (0x40, 65),  // F7
    (0x41, 66),  // F8
    (0x42, 67),  // F9
    (0x43, 68),  // F10
    (0x44, 87),  // F11
    (0x45, 88),  // F12
    (0x46, 99),  // PrintScreen (SysRq)
    (0x47, 70),  // ScrollLock
    (0x48, 119), // Pause
    (0x49, 110), // Insert
    (0x4A, 102), // Home
    (0x4B, 104), // PageUp
    (0x4C, 111), // Delete
    (0x4D, 107), // End
    (0x4E, 109), // PageDown
    (0x4F, 106), // Right
    (0x50, 105), // Left
    (0x51, 108), // Down
    (0x52, 103), // Up
    (0x65, 127), // Application / Menu
];

/// USB HID consumer-page usage -> Linux key code, limited to the control set
/// mice/keyboards with multimedia keys actually use.
const CONSUMER_USAGE_TO_KEYCODE: &[(u16, u32)] = &[
    (0x30, 116), // Power
    (0xB0, 164), // Play
    (0xB1, 164), // Pause (mapped to the same PlayPause key as most firmware)
    (0xB5, 163), // Scan Next Track
    (0xB6, 165), // Scan Previous Track
    (0xB7, 166), // Stop
    (0xCD, 164), // Play/Pause
    (0xE2, 113), // Mute
    (0xE9, 115), // Volume Up
    (0xEA, 114), // Volume Down
    (0x183, 171), // AL Consumer Control Configuration (Media Select)
    (0x18A, 155), // AL Email Reader
    (0x192, 140), // AL Calculator
    (0x194, 150), // AL Local Machine Browser
    (0x221, 217), // AC Search
    (0x223, 172), // AC Home
    (0x224, 158), // AC Back
    (0x225, 159), // AC Forward
    (0x226, 128), // AC Stop
    (0x227, 173), // AC Refresh
    (0x22A, 156), // AC Bookmarks
];

/// Look up the Linux key code for a keyboard-page HID usage. Returns `None`
/// for usages this table doesn't recognize (e.g. locale-specific keys).
#[allow(dead_code)]
pub fn keycode_from_keyboard_usage(usage: u16) -> Option<u32> {
    KEYBOARD_USAGE_TO_KEYCODE
        .iter()
        .find(|&&(u, _)| u == usage)
        .map(|&(_, code)| code)
}

/// Inverse of [`keycode_from_keyboard_usage`].
#[allow(dead_code)]
pub fn keyboard_usage_from_keycode(keycode: u32) -> Option<u16> {
    KEYBOARD_USAGE_TO_KEYCODE
        .iter()
        .find(|&&(_, c)| c == keycode)
        .map(|&(usage, _)| usage)
}

/// Look up the Linux key code for a consumer-page HID usage.
#[allow(dead_code)]
pub fn keycode_from_consumer_usage(usage: u16) -> Option<u32> {
    CONSUMER_USAGE_TO_KEYCODE
        .iter()
        .find(|&&(u, _)| u == usage)
        .map(|&(_, code)| code)
}

/// Inverse of [`keycode_from_consumer_usage`].
#[allow(dead_code)]
pub fn consumer_usage_from_keycode(keycode: u32) -> Option<u16> {
    CONSUMER_USAGE_TO_KEYCODE
        .iter()
        .find(|&&(_, c)| c == keycode)
        .map(|&(usage, _)| usage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_a_round_trips() {
        let code = keycode_from_keyboard_usage(0x04).unwrap();
        assert_eq!(code, 30);
        assert_eq!(keyboard_usage_from_keycode(code), Some(0x04));
    }

    #[test]
    fn unknown_keyboard_usage_is_none() {
        assert_eq!(keycode_from_keyboard_usage(0xFFFF), None);
    }

    #[test]
    fn consumer_volume_up_round_trips() {
        let code = keycode_from_consumer_usage(0xE9).unwrap();
        assert_eq!(code, 115);
        assert_eq!(consumer_usage_from_keycode(code), Some(0xE9));
    }

    #[test]
    fn keyboard_and_consumer_tables_address_disjoint_usage_numbers() {
        /* 0x30 means "Power" on the consumer page but "C" on the keyboard */
        /* page; a caller falling through from keyboard to consumer only  */
        /* on a keyboard miss must not get the wrong table's answer.      */
        assert_eq!(keycode_from_consumer_usage(0x30), Some(116));
        assert_eq!(keycode_from_keyboard_usage(0x30), None);
    }
}
