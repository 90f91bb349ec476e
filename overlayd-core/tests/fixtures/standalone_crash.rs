//  Copyright (C) 2017-2019  The AXIOM TEAM Association.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Standalone module stand-in for scenario S4: answers the first two
//! requests (`on_init`, `on_active`) with `RETURN` and then exits without
//! answering the third, simulating a child that crashes mid-operation.

use overlayd_core::host::wire::{read_frame, write_frame, ChildToParent, ParentToChild};
use std::io::{stdin, stdout};

fn main() {
    let mut input = stdin();
    let mut output = stdout();
    for _ in 0..2 {
        match read_frame::<_, ParentToChild>(&mut input) {
            Ok(_) => {
                if write_frame(&mut output, &ChildToParent::Return).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
    // The third request is read and then silently dropped: no reply, no
    // clean shutdown, just exiting as if the process had crashed.
    let _ = read_frame::<_, ParentToChild>(&mut input);
}
