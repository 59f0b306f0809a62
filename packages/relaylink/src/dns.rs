//! Captive-portal DNS: every `A` question is answered with the portal
//! address so any hostname a client tries lands on the onboarding page.

const HEADER_LEN: usize = 12;
const TYPE_A: u16 = 1;
const TYPE_ANY: u16 = 255;
const CLASS_IN: u16 = 1;
const ANSWER_TTL_S: u32 = 60;
const ANSWER_LEN: usize = 16;

/// Writes the response to `query` into `out` and returns its length.
/// Responses, multi-question packets and anything malformed yield `None`.
pub fn answer_query(query: &[u8], addr: [u8; 4], out: &mut [u8]) -> Option<usize> {
    if query.len() < HEADER_LEN {
        return None;
    }
    let flags = u16::from_be_bytes([query[2], query[3]]);
    let is_response = flags & 0x8000 != 0;
    let opcode = (flags >> 11) & 0x0F;
    let questions = u16::from_be_bytes([query[4], query[5]]);
    if is_response || opcode != 0 || questions != 1 {
        return None;
    }

    let question_end = question_end(query)?;
    let qtype = u16::from_be_bytes([query[question_end - 4], query[question_end - 3]]);
    let qclass = u16::from_be_bytes([query[question_end - 2], query[question_end - 1]]) & 0x7FFF;
    let answer = (qtype == TYPE_A || qtype == TYPE_ANY) && qclass == CLASS_IN;

    let total = question_end + if answer { ANSWER_LEN } else { 0 };
    let out = out.get_mut(..total)?;
    out[..question_end].copy_from_slice(&query[..question_end]);

    // QR=1, keep opcode and RD, AA=1, RA=1, RCODE=0.
    let response_flags = 0x8000 | (flags & 0x7900) | 0x0400 | 0x0080;
    out[2..4].copy_from_slice(&response_flags.to_be_bytes());
    out[6..8].copy_from_slice(&u16::from(answer).to_be_bytes());
    out[8..12].fill(0);

    if answer {
        let record = &mut out[question_end..];
        record[0..2].copy_from_slice(&0xC00Cu16.to_be_bytes());
        record[2..4].copy_from_slice(&TYPE_A.to_be_bytes());
        record[4..6].copy_from_slice(&CLASS_IN.to_be_bytes());
        record[6..10].copy_from_slice(&ANSWER_TTL_S.to_be_bytes());
        record[10..12].copy_from_slice(&4u16.to_be_bytes());
        record[12..16].copy_from_slice(&addr);
    }
    Some(total)
}

/// End offset of the single question (name, type, class).
fn question_end(query: &[u8]) -> Option<usize> {
    let mut at = HEADER_LEN;
    loop {
        let len = *query.get(at)? as usize;
        if len == 0 {
            at += 1;
            break;
        }
        // Compression pointers cannot appear in a lone question.
        if len & 0xC0 != 0 {
            return None;
        }
        at += 1 + len;
    }
    let end = at + 4;
    (end <= query.len()).then_some(end)
}
