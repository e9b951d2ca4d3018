//! Textual listing of a method body.

use ilimport_bytecode::{DecodeError, Decoder, EhClauseKind, MethodBody};

/// One instruction per line, followed by the exception clause table.
pub fn disassemble(body: &MethodBody) -> Result<String, DecodeError> {
    let mut out = String::new();
    for insn in Decoder::new(&body.code) {
        out.push_str(&format!("{}\n", insn?));
    }
    for (index, clause) in body.eh_clauses.iter().enumerate() {
        let kind = match clause.kind {
            EhClauseKind::Catch(token) => format!("catch {token}"),
            EhClauseKind::Filter { filter_offset } => format!("filter IL_{filter_offset:04X}"),
            EhClauseKind::Finally => "finally".to_string(),
            EhClauseKind::Fault => "fault".to_string(),
        };
        out.push_str(&format!(
            ".eh {index}: try [IL_{:04X}..IL_{:04X}) {kind} handler [IL_{:04X}..IL_{:04X})\n",
            clause.try_offset,
            clause.try_end(),
            clause.handler_offset,
            clause.handler_end(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use ilimport_bytecode::{BytecodeBuilder, EhClause, Opcode};

    use super::*;

    #[test]
    fn lists_instructions_and_clauses() {
        let mut b = BytecodeBuilder::new();
        let end = b.new_label();
        b.ldc_i4(1).op(Opcode::Pop).unwrap();
        b.branch(Opcode::LeaveS, end).unwrap();
        b.op(Opcode::Endfinally).unwrap();
        b.bind(end).op(Opcode::Ret).unwrap();
        let body = MethodBody::new(b.finish().unwrap(), 1).with_clause(EhClause {
            kind: EhClauseKind::Finally,
            try_offset: 0,
            try_length: 4,
            handler_offset: 4,
            handler_length: 1,
        });
        insta::assert_snapshot!(disassemble(&body).unwrap(), @r"
        IL_0000: ldc.i4.1
        IL_0001: pop
        IL_0002: leave.s IL_0005
        IL_0004: endfinally
        IL_0005: ret
        .eh 0: try [IL_0000..IL_0004) finally handler [IL_0004..IL_0005)
        ");
    }

    #[test]
    fn truncated_code_is_an_error() {
        let body = MethodBody::new(vec![0x20, 0x01], 1);
        assert_eq!(disassemble(&body), Err(DecodeError::Truncated { offset: 0 }));
    }
}
