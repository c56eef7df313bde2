use nom::{
    bytes::complete::{take_till1, take_while1, take_while_m_n},
    character::complete::{char, digit1, one_of, satisfy, space1},
    combinator::{map_res, recognize, rest},
    sequence::terminated,
    IResult, Parser,
};

use crate::models::{CalibrationRow, CHANNEL_COUNT};

pub const DELIMITER: char = '#';

fn end_value(input: &str) -> IResult<&str, f32> {
    map_res(
        take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        |s: &str| s.parse::<f32>(),
    )
    .parse(input)
}

/// `#v1#v2#v3#v4#v5#v6#` with unsigned decimal values.
pub fn end_values_frame(input: &str) -> IResult<&str, [f32; CHANNEL_COUNT]> {
    let (mut input, _) = char(DELIMITER).parse(input)?;
    let mut values = [0.0; CHANNEL_COUNT];
    for slot in values.iter_mut() {
        let (rest, value) = terminated(end_value, char(DELIMITER)).parse(input)?;
        *slot = value;
        input = rest;
    }
    Ok((input, values))
}

/// Six digits, each selecting range R1..R5.
pub fn range_code(input: &str) -> IResult<&str, [u8; CHANNEL_COUNT]> {
    let (input, digits) = take_while_m_n(CHANNEL_COUNT, CHANNEL_COUNT, |c: char| {
        ('1'..='5').contains(&c)
    })
    .parse(input)?;
    let mut ranges = [0u8; CHANNEL_COUNT];
    for (slot, b) in ranges.iter_mut().zip(digits.bytes()) {
        *slot = b - b'0';
    }
    Ok((input, ranges))
}

/// One `key value` header line. The value is everything after the first space.
pub fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, key) = take_till1(|c: char| c.is_whitespace()).parse(input)?;
    let (input, _) = char(' ').parse(input)?;
    let (input, value) = rest(input)?;
    Ok((input, (key, value)))
}

/// `K51 2625.01 26.64 1290.76 13.12 164.85 1.79`
pub fn calibration_row(input: &str) -> IResult<&str, CalibrationRow> {
    let (input, key) = recognize((
        char('K'),
        one_of("56"),
        satisfy(|c: char| c.is_ascii_digit()),
    ))
    .parse(input)?;
    let mut params = [0.0f32; 6];
    let mut input = input;
    for slot in params.iter_mut() {
        let (rest, _) = space1(input)?;
        let (rest, value) = map_res(
            take_while1(|c: char| c.is_ascii_digit() || c == '.' || c == '-'),
            |s: &str| s.parse::<f32>(),
        )
        .parse(rest)?;
        *slot = value;
        input = rest;
    }
    let bytes = key.as_bytes();
    Ok((
        input,
        CalibrationRow {
            key: key.to_string(),
            channel: bytes[1] - b'0',
            range: bytes[2] - b'0',
            params,
        },
    ))
}

/// `12.34` style decimal.
pub fn decimal(input: &str) -> IResult<&str, f32> {
    map_res(recognize((digit1, char('.'), digit1)), |s: &str| {
        s.parse::<f32>()
    })
    .parse(input)
}

/// First decimal in `text`, searching from every digit position.
pub fn find_decimal(text: &str) -> Option<(usize, f32)> {
    text.char_indices()
        .filter(|(i, c)| {
            c.is_ascii_digit() && !text[..*i].ends_with(|p: char| p.is_ascii_digit())
        })
        .find_map(|(i, _)| decimal(&text[i..]).ok().map(|(_, v)| (i, v)))
}

/// Keep only `[0-9.-]` and parse; `None` for an unreadable channel.
pub fn reading(part: &str) -> Option<f32> {
    let cleaned: String = part
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f32>().ok()
}
